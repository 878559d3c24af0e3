//! Invoice delivery by email.

mod common;

use common::{invoice_request, TestApp};
use serde_json::Value;

#[tokio::test]
async fn send_invoice_emails_document_and_marks_sent() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(&invoice_request()).await;
    let id = invoice["invoice_id"].as_str().expect("invoice id");
    let number = invoice["invoice_number"].as_str().expect("invoice number");

    let response = app.post(&format!("/invoices/{}/send", id)).await;
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["message"], "Invoice sent successfully");
    assert_eq!(body["data"]["status"], "sent");

    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    let email = &sent[0];
    assert_eq!(email.to, "ap@acme.test");
    assert_eq!(email.subject, format!("Invoice {}", number));
    assert!(email.body_html.contains("Acme Ltd"));
    assert!(email.body_html.contains("$540.00"));
    assert_eq!(email.attachments.len(), 1);
    assert_eq!(email.attachments[0].filename, format!("invoice-{}.pdf", number));
    assert_eq!(email.attachments[0].content_type, "application/pdf");
    assert!(email.attachments[0].content.starts_with(b"%PDF-"));

    let stored = app.fetch_invoice(id).await;
    assert_eq!(stored["status"], "sent");
}

#[tokio::test]
async fn resending_keeps_status_sent() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(&invoice_request()).await;
    let id = invoice["invoice_id"].as_str().expect("invoice id");

    for _ in 0..2 {
        let response = app.post(&format!("/invoices/{}/send", id)).await;
        assert_eq!(response.status().as_u16(), 200);
    }

    assert_eq!(app.mailer.sent().len(), 2);
    assert_eq!(app.fetch_invoice(id).await["status"], "sent");
}

#[tokio::test]
async fn mail_failure_leaves_status_unchanged() {
    let app = TestApp::spawn().await;
    let invoice = app.create_invoice(&invoice_request()).await;
    let id = invoice["invoice_id"].as_str().expect("invoice id");

    app.mailer.set_failing(true);
    let response = app.post(&format!("/invoices/{}/send", id)).await;
    assert_eq!(response.status().as_u16(), 500);

    let body: Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Failed to send invoice");

    assert_eq!(app.fetch_invoice(id).await["status"], "draft");
}

#[tokio::test]
async fn send_without_document_fails_when_store_is_down() {
    let app = TestApp::spawn_with_failing_store().await;
    let invoice = app.create_invoice(&invoice_request()).await;
    let id = invoice["invoice_id"].as_str().expect("invoice id");

    let response = app.post(&format!("/invoices/{}/send", id)).await;
    assert_eq!(response.status().as_u16(), 500);

    assert!(app.mailer.sent().is_empty());
    let stored = app.fetch_invoice(id).await;
    assert_eq!(stored["status"], "draft");
    assert_eq!(stored["document_status"], "render_failed");
}
