//! Progress reporting for ingestion.

use std::fmt;

use serde::Serialize;

/// Coarse phases of one ingestion, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStage {
    Open,
    Images,
    Chapters,
    Toc,
    Write,
    Done,
}

impl IngestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStage::Open => "open",
            IngestStage::Images => "images",
            IngestStage::Chapters => "chapters",
            IngestStage::Toc => "toc",
            IngestStage::Write => "write",
            IngestStage::Done => "done",
        }
    }
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: IngestStage,
    /// Position within the stage (chapters) or within the whole run.
    pub current: u64,
    pub total: Option<u64>,
    pub message: Option<String>,
}

/// Receives progress updates. Implement this to drive a progress bar or a
/// status line.
pub trait ProgressHandler: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressHandler for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

pub fn emit_progress(
    handler: Option<&dyn ProgressHandler>,
    stage: IngestStage,
    current: u64,
    total: Option<u64>,
    message: Option<&str>,
) {
    if let Some(h) = handler {
        h.on_progress(ProgressEvent {
            stage,
            current,
            total,
            message: message.map(str::to_string),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closures_receive_events() {
        emit_progress(None, IngestStage::Open, 1, Some(3), None);

        let seen = Mutex::new(Vec::new());
        let handler = |e: ProgressEvent| seen.lock().unwrap().push((e.stage, e.current, e.message));
        emit_progress(Some(&handler), IngestStage::Chapters, 2, Some(3), Some("ch2.xhtml"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(IngestStage::Chapters, 2, Some("ch2.xhtml".to_string()))]
        );
    }

    #[test]
    fn stages_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&IngestStage::Toc).unwrap(), "\"toc\"");
        assert_eq!(IngestStage::Done.to_string(), "done");
    }
}
