//! Per-user interactive state.
//!
//! A [`Session`] is owned by whoever drives the interaction (the CLI loop, a
//! request handler) and passed into every [`crate::scan::Scanner`] call.
//! Nothing here is global, so two sessions never see each other's records.

use crate::form::ExpenseForm;
use crate::pipeline::encode::Receipt;
use crate::record::ExpenseRecord;

/// State of one interactive session.
#[derive(Debug, Default)]
pub struct Session {
    receipt: Option<Receipt>,
    pending: Option<ExpenseRecord>,
    model: Option<String>,
    saved_rows: usize,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receipt currently loaded, if any.
    pub fn receipt(&self) -> Option<&Receipt> {
        self.receipt.as_ref()
    }

    /// A new upload replaces the previous one and drops its record.
    pub fn set_receipt(&mut self, receipt: Receipt) -> &Receipt {
        self.pending = None;
        self.receipt.insert(receipt)
    }

    /// Most recent successful extraction, if not yet saved.
    pub fn pending(&self) -> Option<&ExpenseRecord> {
        self.pending.as_ref()
    }

    /// Record the outcome of an extraction attempt. A failed attempt clears
    /// any earlier record.
    pub fn set_pending(&mut self, record: Option<ExpenseRecord>) {
        self.pending = record;
    }

    /// Form pre-populated from the pending record, or blank.
    pub fn form(&self) -> ExpenseForm {
        self.pending
            .as_ref()
            .map(ExpenseForm::from_record)
            .unwrap_or_default()
    }

    /// Called after a row was appended.
    pub fn mark_saved(&mut self) {
        self.pending = None;
        self.saved_rows += 1;
    }

    /// Rows appended during this session.
    pub fn saved_rows(&self) -> usize {
        self.saved_rows
    }

    /// Model resolved earlier in this session.
    pub fn cached_model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn cache_model(&mut self, model: impl Into<String>) {
        self.model = Some(model.into());
    }

    /// Forget the cached model so the next extraction resolves again.
    pub fn clear_model(&mut self) {
        self.model = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::Category;
    use crate::pipeline::encode::ReceiptSource;

    fn receipt(name: &str) -> Receipt {
        Receipt {
            name: name.into(),
            source: ReceiptSource::Image,
            mime_type: "image/png",
            bytes: vec![],
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn lifecycle() {
        let mut s = Session::new();
        assert!(s.pending().is_none());
        assert_eq!(s.form(), ExpenseForm::default());

        s.set_pending(Some(ExpenseRecord {
            categoria: Some("Comida".into()),
            ..Default::default()
        }));
        assert_eq!(s.form().categoria, Category::Comida);

        s.mark_saved();
        assert!(s.pending().is_none());
        assert_eq!(s.saved_rows(), 1);
    }

    #[test]
    fn new_upload_drops_record() {
        let mut s = Session::new();
        s.set_receipt(receipt("a.png"));
        s.set_pending(Some(ExpenseRecord::default()));
        s.set_receipt(receipt("b.png"));
        assert!(s.pending().is_none());
        assert_eq!(s.receipt().map(|r| r.name.as_str()), Some("b.png"));
    }

    #[test]
    fn failed_attempt_overwrites() {
        let mut s = Session::new();
        s.set_pending(Some(ExpenseRecord::default()));
        s.set_pending(None);
        assert!(s.pending().is_none());
    }
}
