//! Database service for invoicing-service.

use crate::models::{
    CreateInvoice, CreateLineItem, DocumentOutcome, Invoice, LineItem, ListInvoicesFilter,
    PaidTransition,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::InvoiceRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = r#"
    invoice_id, owner_id, customer_id, invoice_number, customer_name, customer_email,
    customer_address, issue_date, due_date, subtotal, tax, discount, total, notes,
    status, document_status, pdf_url, stripe_payment_intent_id, payment_method, paid_at, created_at
"#;

const LINE_ITEM_COLUMNS: &str = r#"
    line_item_id, invoice_id, description, quantity, unit_price, amount, sort_order, created_at
"#;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoicing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn insert_invoice_rows(
        tx: &mut Transaction<'_, Postgres>,
        input: &CreateInvoice,
        items: &[CreateLineItem],
    ) -> Result<(Invoice, Vec<LineItem>), sqlx::Error> {
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices (
                invoice_id, owner_id, customer_id, invoice_number, customer_name, customer_email,
                customer_address, issue_date, due_date, subtotal, tax, discount, total, notes,
                status, document_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 'draft', 'pending')
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.owner_id)
        .bind(input.customer_id)
        .bind(&input.invoice_number)
        .bind(&input.customer_name)
        .bind(&input.customer_email)
        .bind(&input.customer_address)
        .bind(input.issue_date)
        .bind(input.due_date)
        .bind(input.subtotal)
        .bind(input.tax)
        .bind(input.discount)
        .bind(input.total)
        .bind(&input.notes)
        .fetch_one(&mut **tx)
        .await?;

        let mut line_items = Vec::with_capacity(items.len());
        for item in items {
            let line_item = sqlx::query_as::<_, LineItem>(&format!(
                r#"
                INSERT INTO invoice_items (
                    line_item_id, invoice_id, description, quantity, unit_price, amount, sort_order
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {LINE_ITEM_COLUMNS}
                "#
            ))
            .bind(Uuid::new_v4())
            .bind(invoice.invoice_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.amount)
            .bind(item.sort_order)
            .fetch_one(&mut **tx)
            .await?;
            line_items.push(line_item);
        }

        Ok((invoice, line_items))
    }
}

#[async_trait]
impl InvoiceRepository for Database {
    #[instrument(skip(self, input, items), fields(owner_id = %input.owner_id, invoice_number = %input.invoice_number))]
    async fn create_invoice(
        &self,
        input: &CreateInvoice,
        items: &[CreateLineItem],
    ) -> Result<(Invoice, Vec<LineItem>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let result = Self::insert_invoice_rows(&mut tx, input, items).await;

        let (invoice, line_items) = match result {
            Ok(rows) => rows,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed invoice insert failed");
                }
                timer.observe_duration();
                return Err(match e {
                    sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                        AppError::Conflict(anyhow::anyhow!(
                            "Invoice number '{}' already exists",
                            input.invoice_number
                        ))
                    }
                    _ => AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to create invoice: {}",
                        e
                    )),
                });
            }
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit invoice: {}", e))
        })?;

        timer.observe_duration();

        info!(
            invoice_id = %invoice.invoice_id,
            line_items = line_items.len(),
            "Draft invoice created"
        );

        Ok((invoice, line_items))
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %invoice_id))]
    async fn get_invoice(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE owner_id = $1 AND invoice_id = $2
            "#
        ))
        .bind(owner_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_line_items(&self, invoice_id: Uuid) -> Result<Vec<LineItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_line_items"])
            .start_timer();

        let line_items = sqlx::query_as::<_, LineItem>(&format!(
            r#"
            SELECT {LINE_ITEM_COLUMNS}
            FROM invoice_items
            WHERE invoice_id = $1
            ORDER BY sort_order, created_at
            "#
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get line items: {}", e)))?;

        timer.observe_duration();

        Ok(line_items)
    }

    #[instrument(skip(self, filter), fields(owner_id = %owner_id))]
    async fn list_invoices(
        &self,
        owner_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let status_str = filter.status.map(|s| s.as_str().to_string());

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE owner_id = $1
              AND ($2::varchar IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#
        ))
        .bind(owner_id)
        .bind(&status_str)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();

        Ok(invoices)
    }

    #[instrument(skip(self, outcome), fields(invoice_id = %invoice_id))]
    async fn record_document(
        &self,
        invoice_id: Uuid,
        outcome: &DocumentOutcome,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_document"])
            .start_timer();

        let (pdf_url, document_status) = match outcome {
            DocumentOutcome::Rendered { pdf_url } => (Some(pdf_url.as_str()), "rendered"),
            DocumentOutcome::Failed => (None, "render_failed"),
        };

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET pdf_url = $2,
                document_status = $3
            WHERE invoice_id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice_id)
        .bind(pdf_url)
        .bind(document_status)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record document: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %invoice_id))]
    async fn mark_sent(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_sent"])
            .start_timer();

        // Only drafts advance; sent and paid invoices come back unchanged.
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = CASE WHEN status = 'draft' THEN 'sent' ELSE status END
            WHERE owner_id = $1 AND invoice_id = $2
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(owner_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoice sent: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %invoice_id))]
    async fn set_payment_intent(
        &self,
        owner_id: Uuid,
        invoice_id: Uuid,
        payment_intent_id: &str,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_payment_intent"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET stripe_payment_intent_id = $3
            WHERE owner_id = $1 AND invoice_id = $2
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(owner_id)
        .bind(invoice_id)
        .bind(payment_intent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Payment intent is already attached to another invoice"
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!(
                "Failed to store payment intent: {}",
                e
            )),
        })?;

        timer.observe_duration();

        Ok(invoice)
    }

    #[instrument(skip(self))]
    async fn mark_paid_by_payment_intent(
        &self,
        payment_intent_id: &str,
        payment_method: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<PaidTransition, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_paid"])
            .start_timer();

        // Guarded by current status so concurrent redeliveries match one row at most once.
        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            UPDATE invoices
            SET status = 'paid',
                paid_at = $2,
                payment_method = $3
            WHERE stripe_payment_intent_id = $1 AND status <> 'paid'
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(payment_intent_id)
        .bind(paid_at)
        .bind(payment_method)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to mark invoice paid: {}", e)))?;

        let transition = match invoice {
            Some(invoice) => PaidTransition::Transitioned(invoice),
            None => {
                let existing: Option<Uuid> = sqlx::query_scalar(
                    r#"
                    SELECT invoice_id
                    FROM invoices
                    WHERE stripe_payment_intent_id = $1
                    "#,
                )
                .bind(payment_intent_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to look up invoice: {}", e))
                })?;

                match existing {
                    Some(invoice_id) => PaidTransition::AlreadyPaid { invoice_id },
                    None => PaidTransition::NoMatch,
                }
            }
        };

        timer.observe_duration();

        Ok(transition)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}
