// Inline reasoning extraction.
//
// Some backends stream their hidden reasoning inside the ordinary content
// channel, wrapped in `<name>...</name>`. `ReasoningExtractor` splits such a
// stream into a reasoning channel and a visible channel while text arrives in
// arbitrary fragments.
//
// Invariants:
// - The marker must open the turn (after a leading run of newlines). Once
//   any other visible text has been seen the extractor stays in passthrough.
// - Bytes that might still become a start or end tag are held back, never
//   emitted early and never dropped; `finish()` releases whatever is held.
// - Output is independent of where the input was split.

use std::sync::Arc;

/// Marker used when none is configured.
pub const DEFAULT_REASONING_MARKER: &str = "think";

/// A start/end tag pair such as `<think>` / `</think>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningMarker {
    start_tag: String,
    end_tag: String,
}

impl ReasoningMarker {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            start_tag: format!("<{name}>"),
            end_tag: format!("</{name}>"),
        }
    }

    #[must_use]
    pub fn start_tag(&self) -> &str {
        &self.start_tag
    }

    #[must_use]
    pub fn end_tag(&self) -> &str {
        &self.end_tag
    }
}

/// Build markers from configured names, falling back to the default marker
/// for an empty list.
#[must_use]
pub fn markers_from_names<S: AsRef<str>>(names: &[S]) -> Arc<[ReasoningMarker]> {
    if names.is_empty() {
        return Arc::from(vec![ReasoningMarker::new(DEFAULT_REASONING_MARKER)]);
    }
    names
        .iter()
        .map(|name| ReasoningMarker::new(name.as_ref()))
        .collect::<Vec<_>>()
        .into()
}

/// Text released by one extractor step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    pub reasoning: String,
    pub visible: String,
}

impl ExtractedText {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reasoning.is_empty() && self.visible.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionPhase {
    AwaitingMarker,
    /// Inside the marker at this index of the marker list.
    InsideReasoning(usize),
    Passthrough,
}

/// Per-turn state machine separating inline reasoning from visible text.
#[derive(Debug, Clone)]
pub struct ReasoningExtractor {
    markers: Arc<[ReasoningMarker]>,
    phase: ExtractionPhase,
    lookahead: String,
}

impl ReasoningExtractor {
    #[must_use]
    pub fn new(markers: Arc<[ReasoningMarker]>) -> Self {
        Self {
            markers,
            phase: ExtractionPhase::AwaitingMarker,
            lookahead: String::new(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> ExtractionPhase {
        self.phase
    }

    /// Feed the next fragment of the turn's text.
    pub fn push(&mut self, chunk: &str) -> ExtractedText {
        let mut out = ExtractedText::default();
        match self.phase {
            ExtractionPhase::AwaitingMarker => self.await_marker(chunk, &mut out),
            ExtractionPhase::InsideReasoning(marker) => self.inside(marker, chunk, &mut out),
            ExtractionPhase::Passthrough => out.visible.push_str(chunk),
        }
        out
    }

    /// Release held bytes at the end of the turn.
    pub fn finish(&mut self) -> ExtractedText {
        let held = std::mem::take(&mut self.lookahead);
        let mut out = ExtractedText::default();
        match self.phase {
            ExtractionPhase::InsideReasoning(_) => out.reasoning = held,
            ExtractionPhase::AwaitingMarker | ExtractionPhase::Passthrough => out.visible = held,
        }
        self.phase = ExtractionPhase::Passthrough;
        out
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    fn await_marker(&mut self, chunk: &str, out: &mut ExtractedText) {
        // Nothing held means no visible byte has been seen yet, so leading
        // newlines still belong to the stripped prefix.
        let buffer = if self.lookahead.is_empty() {
            chunk.trim_start_matches('\n').to_owned()
        } else {
            let mut held = std::mem::take(&mut self.lookahead);
            held.push_str(chunk);
            held
        };

        if let Some(index) = self
            .markers
            .iter()
            .position(|marker| buffer.starts_with(marker.start_tag()))
        {
            let rest_at = self.markers[index].start_tag().len();
            self.phase = ExtractionPhase::InsideReasoning(index);
            self.inside(index, &buffer[rest_at..], out);
            return;
        }

        if self
            .markers
            .iter()
            .any(|marker| marker.start_tag().starts_with(buffer.as_str()))
        {
            self.lookahead = buffer;
            return;
        }

        self.phase = ExtractionPhase::Passthrough;
        out.visible.push_str(&buffer);
    }

    fn inside(&mut self, marker: usize, chunk: &str, out: &mut ExtractedText) {
        let mut buffer = std::mem::take(&mut self.lookahead);
        buffer.push_str(chunk);
        let end_tag = self.markers[marker].end_tag();

        if let Some(pos) = buffer.find(end_tag) {
            out.reasoning.push_str(&buffer[..pos]);
            self.phase = ExtractionPhase::Passthrough;
            out.visible.push_str(&buffer[pos + end_tag.len()..]);
            return;
        }

        let held = partial_suffix_len(&buffer, end_tag);
        let emit_to = buffer.len() - held;
        out.reasoning.push_str(&buffer[..emit_to]);
        self.lookahead = buffer.split_off(emit_to);
    }
}

/// Length of the longest proper prefix of `tag` that `text` ends with.
fn partial_suffix_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .filter(|&len| tag.is_char_boundary(len))
        .find(|&len| text.ends_with(&tag[..len]))
        .unwrap_or(0)
}

/// Split a complete response into reasoning and visible text.
///
/// Stricter than the streaming extractor: after trimming surrounding
/// whitespace the start tag must sit at offset zero, and the last occurrence
/// of the end tag closes the reasoning. Anything else is all visible, and is
/// returned trimmed either way.
#[must_use]
pub fn extract_reasoning_from_full_text(
    content: &str,
    markers: &[ReasoningMarker],
) -> ExtractedText {
    let trimmed = content.trim();
    for marker in markers {
        if !trimmed.starts_with(marker.start_tag()) {
            continue;
        }
        let Some(end_pos) = trimmed.rfind(marker.end_tag()) else {
            continue;
        };
        if end_pos < marker.start_tag().len() {
            continue;
        }
        return ExtractedText {
            reasoning: trimmed[marker.start_tag().len()..end_pos].to_owned(),
            visible: trimmed[end_pos + marker.end_tag().len()..].to_owned(),
        };
    }

    ExtractedText {
        reasoning: String::new(),
        visible: trimmed.to_owned(),
    }
}
