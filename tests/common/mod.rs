#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb};
use pledge_trust::collaborators::{
    AuditEvent, ClassifierJudgment, ClassifierRequest, ClassifierVerdict, EventSink, Ledger,
    VisualClassifier,
};
use pledge_trust::error::ExternalError;
use std::sync::Mutex;

pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

pub fn sample_png(shift: u8) -> Vec<u8> {
    let img = ImageBuffer::from_fn(64, 64, |x, y| {
        let v = ((x * 4) as u8).wrapping_add(shift);
        Rgb([v, (y * 4) as u8, 128u8])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageOutputFormat::Png)
        .unwrap();
    out
}

/// Always answers with the same judgment.
pub struct FixedClassifier(pub ClassifierJudgment);

impl FixedClassifier {
    pub fn approve(confidence: f64) -> Self {
        Self(ClassifierJudgment {
            verdict: ClassifierVerdict::Approve,
            confidence,
            reasoning: "gym equipment visible".into(),
            red_flags: vec![],
        })
    }

    pub fn reject(confidence: f64) -> Self {
        Self(ClassifierJudgment {
            verdict: ClassifierVerdict::Reject,
            confidence,
            reasoning: "photo shows a couch".into(),
            red_flags: vec![],
        })
    }
}

#[async_trait]
impl VisualClassifier for FixedClassifier {
    async fn classify(&self, _request: ClassifierRequest<'_>) -> Result<ClassifierJudgment, ExternalError> {
        Ok(self.0.clone())
    }
}

/// Answers with raw response text, parsed the way a remote classifier's body is.
pub struct TextClassifier(pub &'static str);

#[async_trait]
impl VisualClassifier for TextClassifier {
    async fn classify(&self, _request: ClassifierRequest<'_>) -> Result<ClassifierJudgment, ExternalError> {
        Ok(ClassifierJudgment::from_response_text(self.0))
    }
}

/// Never answers.
pub struct HangingClassifier;

#[async_trait]
impl VisualClassifier for HangingClassifier {
    async fn classify(&self, _request: ClassifierRequest<'_>) -> Result<ClassifierJudgment, ExternalError> {
        std::future::pending::<()>().await;
        Err(ExternalError::Timeout)
    }
}

#[derive(Default)]
pub struct RecordingLedger {
    pub calls: Mutex<Vec<(u64, bool)>>,
}

#[async_trait]
impl Ledger for RecordingLedger {
    async fn record_outcome(&self, on_chain_goal_id: u64, approved: bool) -> Result<String, ExternalError> {
        self.calls.lock().unwrap().push((on_chain_goal_id, approved));
        Ok(format!("0xtx{on_chain_goal_id}"))
    }
}

pub struct FailingLedger;

#[async_trait]
impl Ledger for FailingLedger {
    async fn record_outcome(&self, _on_chain_goal_id: u64, _approved: bool) -> Result<String, ExternalError> {
        Err(ExternalError::Unavailable("rpc down".into()))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<AuditEvent>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(AuditEvent::kind).collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: &AuditEvent) -> Result<(), ExternalError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct DownSink;

#[async_trait]
impl EventSink for DownSink {
    async fn emit(&self, _event: &AuditEvent) -> Result<(), ExternalError> {
        Err(ExternalError::Unavailable("sink down".into()))
    }
}
