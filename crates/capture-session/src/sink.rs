//! Output sinks: the destinations a capture session routes frames to.

use video_recorder::SurfaceHandle;

/// Sink categories; a session holds at most one of each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Preview,
    Record,
    Still,
}

/// Host-supplied display surface for live preview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSurface {
    /// Opaque host surface id
    pub id: u64,
    /// Viewport width in pixels
    pub width: u32,
    /// Viewport height in pixels
    pub height: u32,
}

/// Still-image reader sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StillSink {
    /// Opaque host reader id
    pub id: u64,
    pub width: u32,
    pub height: u32,
}

/// A destination for captured frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    Preview(PreviewSurface),
    /// Writable surface of a recorder's encoder pipeline
    Record(SurfaceHandle),
    Still(StillSink),
}

impl OutputSink {
    pub fn kind(&self) -> SinkKind {
        match self {
            OutputSink::Preview(_) => SinkKind::Preview,
            OutputSink::Record(_) => SinkKind::Record,
            OutputSink::Still(_) => SinkKind::Still,
        }
    }
}

/// The session's sink set. Immutable for the lifetime of a built sensor
/// session; mutating it triggers a session rebuild.
#[derive(Debug, Clone, Default)]
pub struct SinkSet {
    preview: Option<PreviewSurface>,
    record: Option<SurfaceHandle>,
    still: Option<StillSink>,
}

impl SinkSet {
    /// Add or replace the sink of the matching kind
    pub fn set(&mut self, sink: OutputSink) {
        match sink {
            OutputSink::Preview(s) => self.preview = Some(s),
            OutputSink::Record(s) => self.record = Some(s),
            OutputSink::Still(s) => self.still = Some(s),
        }
    }

    /// Remove the sink of the given kind; returns whether one was present
    pub fn remove(&mut self, kind: SinkKind) -> bool {
        match kind {
            SinkKind::Preview => self.preview.take().is_some(),
            SinkKind::Record => self.record.take().is_some(),
            SinkKind::Still => self.still.take().is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.preview.is_none() && self.record.is_none() && self.still.is_none()
    }

    pub fn len(&self) -> usize {
        [self.preview.is_some(), self.record.is_some(), self.still.is_some()]
            .iter()
            .filter(|present| **present)
            .count()
    }

    pub fn preview(&self) -> Option<&PreviewSurface> {
        self.preview.as_ref()
    }

    pub fn record(&self) -> Option<SurfaceHandle> {
        self.record
    }

    pub fn still(&self) -> Option<&StillSink> {
        self.still.as_ref()
    }

    /// The sinks in binding order, for session creation
    pub fn bindings(&self) -> Vec<OutputSink> {
        let mut out = Vec::with_capacity(3);
        if let Some(s) = &self.preview {
            out.push(OutputSink::Preview(s.clone()));
        }
        if let Some(s) = self.record {
            out.push(OutputSink::Record(s));
        }
        if let Some(s) = &self.still {
            out.push(OutputSink::Still(s.clone()));
        }
        out
    }
}
