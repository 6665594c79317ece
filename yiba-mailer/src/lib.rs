//! yiba-mailer library - email queue drain worker
//!
//! Drains the shared `email_queue` table: PENDING rows are claimed in
//! batches, checked against the suppression list, and handed to the
//! configured delivery provider. SENT and FAILED are terminal.

pub mod mailer;
pub mod queue;
