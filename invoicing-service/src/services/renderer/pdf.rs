//! Invoice PDF layout.
//!
//! The invoice is first laid out as positioned text runs (top-left origin on
//! a US-Letter page), then drawn with printpdf using the built-in Helvetica
//! font so no font embedding is needed.

use crate::models::{Invoice, LineItem};
use printpdf::{BuiltinFont, Mm, PdfDocument, Pt};
use rust_decimal::{Decimal, RoundingStrategy};
use service_core::error::AppError;

pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 50.0;

const COL_DESCRIPTION: f32 = 50.0;
const COL_QTY: f32 = 300.0;
const COL_PRICE: f32 = 350.0;
const COL_AMOUNT: f32 = 450.0;

const DESCRIPTION_WIDTH: f32 = 240.0;
const NOTES_WIDTH: f32 = 500.0;
const BODY_SIZE: f32 = 10.0;
const LINE_HEIGHT: f32 = 12.0;
const MIN_ROW_HEIGHT: f32 = 30.0;

/// Money as shown to customers: `$` prefix, exactly two decimals.
pub fn format_money(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("${:.2}", rounded)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub text: String,
}

/// Positioned text per page, with `y` measured from the top edge.
#[derive(Debug)]
pub struct PageLayout {
    pages: Vec<Vec<TextRun>>,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl PageLayout {
    pub fn new() -> Self {
        Self {
            pages: vec![Vec::new()],
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[Vec<TextRun>] {
        &self.pages
    }

    pub fn new_page(&mut self) {
        self.pages.push(Vec::new());
    }

    pub fn text(&mut self, x: f32, y: f32, size: f32, text: &str) {
        if let Some(page) = self.pages.last_mut() {
            page.push(TextRun {
                x,
                y,
                size,
                text: plain_text(text),
            });
        }
    }

    /// Start a new page if `needed` points do not fit below `y`. Returns the
    /// cursor to continue from.
    pub fn ensure_space(&mut self, y: f32, needed: f32) -> f32 {
        if y + needed > PAGE_HEIGHT - MARGIN {
            self.new_page();
            MARGIN
        } else {
            y
        }
    }
}

/// Helvetica only carries Latin glyphs; anything else prints as `?`.
fn plain_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c,
            '\t' | '\n' | '\r' => ' ',
            _ => '?',
        })
        .collect()
}

fn pdf_error(e: printpdf::Error) -> AppError {
    AppError::InternalError(anyhow::anyhow!("PDF generation failed: {}", e))
}

/// Draw a layout onto US-Letter pages with the built-in Helvetica font.
fn draw(layout: &PageLayout, title: &str) -> Result<Vec<u8>, AppError> {
    let width: Mm = Pt(PAGE_WIDTH).into();
    let height: Mm = Pt(PAGE_HEIGHT).into();

    let (doc, first_page, first_layer) = PdfDocument::new(title, width, height, "Layer 1");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(pdf_error)?;

    for (index, runs) in layout.pages().iter().enumerate() {
        let (page, layer) = if index == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(width, height, "Layer 1")
        };
        let layer = doc.get_page(page).get_layer(layer);

        for run in runs {
            // PDF origin is the bottom-left corner
            let baseline = PAGE_HEIGHT - run.y - run.size;
            layer.use_text(
                run.text.as_str(),
                run.size,
                Pt(run.x).into(),
                Pt(baseline).into(),
                &font,
            );
        }
    }

    doc.save_to_bytes().map_err(pdf_error)
}

/// Greedy word wrap using an average Helvetica glyph width.
fn wrap(text: &str, width: f32, size: f32) -> Vec<String> {
    let max_chars = ((width / (size * 0.5)) as usize).max(1);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let mut word = word;
            while word.chars().count() > max_chars {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
                let split = word
                    .char_indices()
                    .nth(max_chars)
                    .map(|(idx, _)| idx)
                    .unwrap_or(word.len());
                lines.push(word[..split].to_string());
                word = &word[split..];
            }
            if word.is_empty() {
                continue;
            }
            if line.is_empty() {
                line.push_str(word);
            } else if line.chars().count() + 1 + word.chars().count() <= max_chars {
                line.push(' ');
                line.push_str(word);
            } else {
                lines.push(std::mem::replace(&mut line, word.to_string()));
            }
        }
        lines.push(line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Render an invoice and its items to PDF bytes.
pub fn render_invoice(invoice: &Invoice, items: &[LineItem]) -> Result<Vec<u8>, AppError> {
    let layout = layout_invoice(invoice, items);
    draw(&layout, &format!("Invoice {}", invoice.invoice_number))
}

/// Lay out an invoice and its items.
pub fn layout_invoice(invoice: &Invoice, items: &[LineItem]) -> PageLayout {
    let mut canvas = PageLayout::new();

    canvas.text(MARGIN, 50.0, 20.0, "INVOICE");
    canvas.text(
        MARGIN,
        80.0,
        BODY_SIZE,
        &format!("Invoice #: {}", invoice.invoice_number),
    );
    canvas.text(
        MARGIN,
        95.0,
        BODY_SIZE,
        &format!("Issue Date: {}", invoice.issue_date.format("%Y-%m-%d")),
    );
    canvas.text(
        MARGIN,
        110.0,
        BODY_SIZE,
        &format!("Due Date: {}", invoice.due_date.format("%Y-%m-%d")),
    );

    canvas.text(MARGIN, 140.0, 12.0, "Bill To:");
    canvas.text(MARGIN, 160.0, BODY_SIZE, &invoice.customer_name);
    let mut y = 175.0;
    if let Some(address) = invoice.customer_address.as_deref() {
        for line in wrap(address, NOTES_WIDTH, BODY_SIZE) {
            canvas.text(MARGIN, y, BODY_SIZE, &line);
            y += LINE_HEIGHT + 3.0;
        }
    }

    y = y.max(220.0);
    canvas.text(MARGIN, y, 12.0, "Items");
    y += 20.0;

    let header = |canvas: &mut PageLayout, y: f32| {
        canvas.text(COL_DESCRIPTION, y, BODY_SIZE, "Description");
        canvas.text(COL_QTY, y, BODY_SIZE, "Qty");
        canvas.text(COL_PRICE, y, BODY_SIZE, "Price");
        canvas.text(COL_AMOUNT, y, BODY_SIZE, "Amount");
    };
    header(&mut canvas, y);
    y += 20.0;

    for item in items {
        let lines = wrap(&item.description, DESCRIPTION_WIDTH, BODY_SIZE);
        let row_height = (lines.len() as f32 * LINE_HEIGHT + 6.0).max(MIN_ROW_HEIGHT);

        let next = canvas.ensure_space(y, row_height);
        if next < y {
            header(&mut canvas, next);
            y = next + 20.0;
        }

        for (i, line) in lines.iter().enumerate() {
            canvas.text(COL_DESCRIPTION, y + i as f32 * LINE_HEIGHT, BODY_SIZE, line);
        }
        canvas.text(COL_QTY, y, BODY_SIZE, &item.quantity.normalize().to_string());
        canvas.text(COL_PRICE, y, BODY_SIZE, &format_money(item.unit_price));
        canvas.text(COL_AMOUNT, y, BODY_SIZE, &format_money(item.amount));
        y += row_height;
    }

    y = canvas.ensure_space(y + 20.0, 80.0);
    let totals = [
        ("Subtotal", invoice.subtotal, BODY_SIZE),
        ("Tax", invoice.tax, BODY_SIZE),
        ("Discount", invoice.discount, BODY_SIZE),
        ("Total", invoice.total, 12.0),
    ];
    for (i, (label, amount, size)) in totals.iter().enumerate() {
        if i > 0 {
            y += 20.0;
        }
        canvas.text(
            COL_PRICE,
            y,
            *size,
            &format!("{}: {}", label, format_money(*amount)),
        );
    }

    if let Some(notes) = invoice.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        y = canvas.ensure_space(y + 40.0, 20.0 + LINE_HEIGHT);
        canvas.text(MARGIN, y, BODY_SIZE, "Notes:");
        y += 20.0;
        for line in wrap(notes, NOTES_WIDTH, BODY_SIZE) {
            y = canvas.ensure_space(y, LINE_HEIGHT);
            canvas.text(MARGIN, y, BODY_SIZE, &line);
            y += LINE_HEIGHT;
        }
    }

    canvas
}
