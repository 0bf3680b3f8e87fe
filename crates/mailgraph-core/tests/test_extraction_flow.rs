//! End-to-end scenarios: sync → qualification → queue → extraction → graph.

mod common;

use common::{invoice_fields_json, invoice_pdf_text, pdf_with_text, scanned_pdf, FakeMailbox, TestEnv, USER};
use mailgraph_core::models::{DocumentType, ExtractionMethod, PipelineState, QualificationStage};
use mailgraph_core::providers::ProviderKind;
use rust_decimal::Decimal;
use std::str::FromStr;

#[tokio::test]
async fn test_gmail_invoice_with_clean_pdf() {
    let mut mailbox = FakeMailbox::default();
    mailbox.add_email(
        "p1",
        "Invoice #A-1029 from Acme Corp",
        "billing@acme.example.com",
        "Your invoice is attached.",
        vec![("a1", "invoice.pdf", pdf_with_text(&invoice_pdf_text()))],
    );

    // One LLM call expected: field extraction (classification hits keywords)
    let env = TestEnv::new(mailbox, vec![Ok(invoice_fields_json())]).await;

    let report = env
        .coordinator
        .sync_user(USER, ProviderKind::Gmail)
        .await
        .unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.qualified_submitted, 1);

    // Qualification was decided by the subject keyword, not the LLM
    let message = env
        .store
        .get_message_by_provider_id(USER, "p1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.is_qualified, Some(true));
    assert_eq!(message.qualification_stage, Some(QualificationStage::Subject));
    assert_eq!(message.qualification_reason.as_deref(), Some("keyword:invoice"));
    assert_eq!(message.qualification_confidence, Some(0.9));

    assert_eq!(env.drain_jobs(5).await, 1);

    let attachments = env.store.attachments_for_message(&message.id).await.unwrap();
    assert_eq!(attachments.len(), 1);

    let docs: Vec<String> = {
        use sqlx::Row;
        sqlx::query("SELECT id FROM documents WHERE user_id = ?")
            .bind(USER)
            .fetch_all(env.store.pool())
            .await
            .unwrap()
            .iter()
            .map(|r| r.get::<String, _>("id"))
            .collect()
    };
    assert_eq!(docs.len(), 1);

    let document = env.store.get_document(&docs[0]).await.unwrap().unwrap();
    assert_eq!(document.state, PipelineState::Completed);
    // The text layer was free; only field extraction used the model
    assert_eq!(document.extraction_method, Some(ExtractionMethod::PdfText));
    assert_eq!(document.document_type, Some(DocumentType::Invoice));
    assert_eq!(document.page_count, Some(1));

    // One transaction with the extracted amount, linked to the party
    let transactions = env.store.transactions_for_document(&document.id).await.unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].amount, Decimal::from_str("1234.56").unwrap());
    assert_eq!(transactions[0].currency, "USD");

    let party = env
        .store
        .get_party(transactions[0].party_id.as_ref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(party.normalized_name, "acme corp");

    // Exactly one LLM call (field extraction); qualification and
    // classification were keyword-decided
    assert_eq!(env.llm.call_count(), 1);
}

#[tokio::test]
async fn test_marketing_email_enqueues_nothing() {
    let mut mailbox = FakeMailbox::default();
    mailbox.add_email(
        "p1",
        "🎉 Limited time offer — click here to claim now",
        "promo@shop.example.com",
        "Deals deals deals",
        vec![],
    );

    let env = TestEnv::new(mailbox, vec![]).await;
    let report = env
        .coordinator
        .sync_user(USER, ProviderKind::Gmail)
        .await
        .unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.qualified_submitted, 0);

    let message = env
        .store
        .get_message_by_provider_id(USER, "p1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.is_qualified, Some(false));
    assert_eq!(
        message.qualification_reason.as_deref(),
        Some("spam:limited time offer")
    );

    assert_eq!(env.drain_jobs(5).await, 0);
    assert_eq!(env.llm.call_count(), 0);
}

#[tokio::test]
async fn test_scanned_receipt_skipped_by_cost_policy() {
    let mut mailbox = FakeMailbox::default();
    mailbox.add_email(
        "p1",
        "Your receipt",
        "store@shop.example.com",
        "Thanks for shopping with us",
        vec![("a1", "receipt.pdf", scanned_pdf())],
    );

    let env = TestEnv::new(mailbox, vec![]).await;
    env.coordinator
        .sync_user(USER, ProviderKind::Gmail)
        .await
        .unwrap();

    assert_eq!(env.drain_jobs(5).await, 1);

    let docs: Vec<String> = {
        use sqlx::Row;
        sqlx::query("SELECT id FROM documents WHERE user_id = ?")
            .bind(USER)
            .fetch_all(env.store.pool())
            .await
            .unwrap()
            .iter()
            .map(|r| r.get::<String, _>("id"))
            .collect()
    };
    let document = env.store.get_document(&docs[0]).await.unwrap().unwrap();

    assert_eq!(document.state, PipelineState::Skipped);
    assert_eq!(
        document.skipped_reason.as_deref(),
        Some("scanned_pdf_skipped_by_cost_policy")
    );
    // No LLM was consulted at any point
    assert_eq!(env.llm.call_count(), 0);
}

#[tokio::test]
async fn test_duplicate_attachment_across_two_emails() {
    let pdf = pdf_with_text(&invoice_pdf_text());
    let mut mailbox = FakeMailbox::default();
    mailbox.add_email(
        "p1",
        "Invoice #A-1029 from Acme Corp",
        "billing@acme.example.com",
        "Original send",
        vec![("a1", "invoice.pdf", pdf.clone())],
    );
    mailbox.add_email(
        "p2",
        "Fwd: Invoice #A-1029 from Acme Corp",
        "colleague@example.com",
        "Forwarding for your records",
        vec![("a9", "invoice.pdf", pdf)],
    );

    let env = TestEnv::new(mailbox, vec![Ok(invoice_fields_json())]).await;
    env.coordinator
        .sync_user(USER, ProviderKind::Gmail)
        .await
        .unwrap();

    assert_eq!(env.drain_jobs(5).await, 2);

    // One document despite two attachments with the same bytes
    let docs: Vec<String> = {
        use sqlx::Row;
        sqlx::query("SELECT id FROM documents WHERE user_id = ?")
            .bind(USER)
            .fetch_all(env.store.pool())
            .await
            .unwrap()
            .iter()
            .map(|r| r.get::<String, _>("id"))
            .collect()
    };
    assert_eq!(docs.len(), 1);

    // Both messages link to it; the transaction set is single
    let links = env.store.message_ids_for_document(&docs[0]).await.unwrap();
    assert_eq!(links.len(), 2);

    let transactions = env.store.transactions_for_document(&docs[0]).await.unwrap();
    assert_eq!(transactions.len(), 1);
}

#[tokio::test]
async fn test_replaying_a_completed_document_is_a_noop() {
    let mut mailbox = FakeMailbox::default();
    mailbox.add_email(
        "p1",
        "Invoice #A-1029 from Acme Corp",
        "billing@acme.example.com",
        "Attached",
        vec![("a1", "invoice.pdf", pdf_with_text(&invoice_pdf_text()))],
    );

    let env = TestEnv::new(mailbox, vec![Ok(invoice_fields_json())]).await;
    env.coordinator
        .sync_user(USER, ProviderKind::Gmail)
        .await
        .unwrap();
    assert_eq!(env.drain_jobs(5).await, 1);

    let message = env
        .store
        .get_message_by_provider_id(USER, "p1")
        .await
        .unwrap()
        .unwrap();
    let attachment = &env.store.attachments_for_message(&message.id).await.unwrap()[0];

    let payload = mailgraph_core::models::ProcessAttachmentPayload {
        message_id: message.id.clone(),
        attachment_id: attachment.id.clone(),
    };

    let before_llm_calls = env.llm.call_count();
    let outcome = env.pipeline.process_attachment(&payload, None).await.unwrap();
    assert_eq!(outcome, mailgraph_core::pipeline::PipelineOutcome::AlreadyDone);

    // The graph is untouched: same transaction sum, no extra LLM spend
    assert_eq!(env.llm.call_count(), before_llm_calls);

    let docs: Vec<String> = {
        use sqlx::Row;
        sqlx::query("SELECT id FROM documents WHERE user_id = ?")
            .bind(USER)
            .fetch_all(env.store.pool())
            .await
            .unwrap()
            .iter()
            .map(|r| r.get::<String, _>("id"))
            .collect()
    };
    let transactions = env.store.transactions_for_document(&docs[0]).await.unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].amount, Decimal::from_str("1234.56").unwrap());
}

#[tokio::test]
async fn test_second_sync_is_idempotent_end_to_end() {
    let mut mailbox = FakeMailbox::default();
    mailbox.add_email(
        "p1",
        "Invoice #A-1029 from Acme Corp",
        "billing@acme.example.com",
        "Attached",
        vec![("a1", "invoice.pdf", pdf_with_text(&invoice_pdf_text()))],
    );

    let env = TestEnv::new(mailbox, vec![Ok(invoice_fields_json())]).await;
    env.coordinator
        .sync_user(USER, ProviderKind::Gmail)
        .await
        .unwrap();
    env.drain_jobs(5).await;

    let second = env
        .coordinator
        .sync_user(USER, ProviderKind::Gmail)
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.qualified_submitted, 0);

    // Still one message row
    use sqlx::Row;
    let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE user_id = ?")
        .bind(USER)
        .fetch_one(env.store.pool())
        .await
        .unwrap()
        .get("n");
    assert_eq!(count, 1);
}
