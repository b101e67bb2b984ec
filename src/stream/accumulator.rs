// Delta accumulation.
//
// `DeltaAccumulator` folds the partial completions of one logical response
// into an aggregate that can be copied out at any time.
//
// Merge rules:
// - The first non-empty response id pins the response; updates carrying a
//   different id are ignored (never an error).
// - Response-level scalars (model, usage, created, metadata) are
//   last-write-wins; an absent field is not a write.
// - Candidate slots are addressed by index and grow on demand, so index 3
//   may arrive before 0..=2. Indices at or above `MAX_CANDIDATES` reject the
//   whole update before anything is mutated.
// - Text-bearing parts append to the first existing part of the same kind in
//   their slot (signature replaced when the update carries one); other parts
//   are appended as-is. Streamed tool-call fragments are joined by their own
//   tool-call index.

use std::sync::Arc;

use super::reasoning::{ExtractedText, ReasoningExtractor, ReasoningMarker};
use crate::protocol::canonical::{
    new_message_id, CanonicalCompletion, CanonicalMessage, CanonicalPart, CanonicalRole,
    CanonicalToolCall, CanonicalUsage,
};

/// Highest number of parallel candidates one response may address.
pub const MAX_CANDIDATES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccumulateError {
    #[error("candidate index {index} exceeds the limit of {limit}")]
    IndexOutOfRange { index: u32, limit: usize },
}

/// One partial completion as reported by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkUpdate {
    pub response_id: Option<String>,
    pub model: Option<String>,
    pub usage: Option<CanonicalUsage>,
    pub created: Option<u64>,
    pub metadata: Option<serde_json::Value>,
    pub candidates: Vec<CandidateUpdate>,
}

/// Content for one candidate slot within a [`ChunkUpdate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateUpdate {
    pub index: u32,
    pub finish_reason: Option<String>,
    /// Safety ratings, citations and similar per-candidate data.
    pub metadata: Option<serde_json::Value>,
    pub token_count: Option<u64>,
    pub parts: Vec<CanonicalPart>,
    pub tool_call_fragments: Vec<ToolCallFragment>,
}

impl CandidateUpdate {
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }
}

/// A piece of a tool call streamed across several updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// What one candidate contributed in one `add` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateIncrement {
    pub index: u32,
    /// Reasoning and visible text released this call, after marker
    /// extraction.
    pub text: ExtractedText,
    /// The update's parts as they were folded in.
    pub parts: Vec<CanonicalPart>,
}

/// Result of [`DeltaAccumulator::add`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddOutcome {
    pub increments: Vec<CandidateIncrement>,
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ReasoningSource {
    #[default]
    Undecided,
    /// The backend reports reasoning as separate parts.
    Explicit,
    /// Reasoning is inlined in the text and must be extracted.
    Inline,
}

#[derive(Debug, Clone, Default)]
struct PendingToolCall {
    index: u32,
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Default)]
struct CandidateSlot {
    parts: Vec<CanonicalPart>,
    pending_calls: Vec<PendingToolCall>,
    finish_reason: Option<String>,
    metadata: Option<serde_json::Value>,
    token_count: Option<u64>,
    source: ReasoningSource,
    extractor: Option<ReasoningExtractor>,
}

/// Folds partial completions into one aggregate completion.
#[derive(Debug, Clone)]
pub struct DeltaAccumulator {
    message_id: String,
    response_id: Option<String>,
    model: String,
    usage: CanonicalUsage,
    created: Option<u64>,
    metadata: Option<serde_json::Value>,
    slots: Vec<Option<CandidateSlot>>,
    markers: Option<Arc<[ReasoningMarker]>>,
}

impl DeltaAccumulator {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            message_id: new_message_id(),
            response_id: None,
            model: model.into(),
            usage: CanonicalUsage::default(),
            created: None,
            metadata: None,
            slots: Vec::new(),
            markers: None,
        }
    }

    /// Attach an inline-reasoning extractor (one per candidate slot).
    #[must_use]
    pub fn with_reasoning_markers(mut self, markers: Arc<[ReasoningMarker]>) -> Self {
        self.markers = Some(markers);
        self
    }

    /// Fold one update into the aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`AccumulateError::IndexOutOfRange`] without touching the
    /// aggregate when any candidate index is at or above [`MAX_CANDIDATES`].
    pub fn add(&mut self, update: ChunkUpdate) -> Result<AddOutcome, AccumulateError> {
        if let Some(candidate) = update
            .candidates
            .iter()
            .find(|candidate| candidate.index as usize >= MAX_CANDIDATES)
        {
            return Err(AccumulateError::IndexOutOfRange {
                index: candidate.index,
                limit: MAX_CANDIDATES,
            });
        }

        if let Some(id) = update.response_id.as_deref().filter(|id| !id.is_empty()) {
            match self.response_id.as_deref() {
                Some(pinned) if pinned != id => {
                    tracing::debug!(pinned, stray = id, "ignoring update from another response");
                    return Ok(AddOutcome::default());
                }
                Some(_) => {}
                None => self.response_id = Some(id.to_owned()),
            }
        }

        let mut changed = false;
        changed |= overwrite(&mut self.model, update.model);
        changed |= overwrite(&mut self.usage, update.usage);
        changed |= overwrite_opt(&mut self.created, update.created);
        changed |= overwrite_opt(&mut self.metadata, update.metadata);

        let mut increments = Vec::with_capacity(update.candidates.len());
        for candidate in update.candidates {
            let markers = self.markers.clone();
            let slot = self.slot_mut(candidate.index as usize);
            changed |= overwrite_opt(&mut slot.finish_reason, candidate.finish_reason);
            changed |= overwrite_opt(&mut slot.metadata, candidate.metadata);
            changed |= overwrite_opt(&mut slot.token_count, candidate.token_count);

            let (parts, text) = slot.route_reasoning(candidate.parts, markers);
            for part in &parts {
                changed |= merge_part(&mut slot.parts, part.clone());
            }
            for fragment in candidate.tool_call_fragments {
                changed |= slot.merge_fragment(fragment);
            }

            increments.push(CandidateIncrement {
                index: candidate.index,
                text,
                parts,
            });
        }

        Ok(AddOutcome {
            increments,
            changed,
        })
    }

    /// Release text held by the reasoning extractors at end of stream.
    pub fn finish(&mut self) -> Vec<CandidateIncrement> {
        let mut increments = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(slot) = slot else { continue };
            let Some(extractor) = slot.extractor.as_mut() else {
                continue;
            };
            let text = extractor.finish();
            if text.is_empty() {
                continue;
            }
            let parts = text_parts(&text);
            for part in &parts {
                merge_part(&mut slot.parts, part.clone());
            }
            increments.push(CandidateIncrement {
                index: u32::try_from(index).unwrap_or(u32::MAX),
                text,
                parts,
            });
        }
        increments
    }

    fn slot_mut(&mut self, index: usize) -> &mut CandidateSlot {
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index].get_or_insert_with(CandidateSlot::default)
    }

    #[must_use]
    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn usage(&self) -> CanonicalUsage {
        self.usage
    }

    #[must_use]
    pub fn created(&self) -> Option<u64> {
        self.created
    }

    /// Number of addressable slots (highest seen index + 1).
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn has_candidate(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    #[must_use]
    pub fn finish_reason(&self, index: usize) -> Option<&str> {
        self.slots
            .get(index)?
            .as_ref()?
            .finish_reason
            .as_deref()
    }

    #[must_use]
    pub fn candidate_metadata(&self, index: usize) -> Option<&serde_json::Value> {
        self.slots.get(index)?.as_ref()?.metadata.as_ref()
    }

    /// Copy of the aggregate for candidate 0, flagged as a delta.
    #[must_use]
    pub fn snapshot(&self) -> CanonicalCompletion {
        self.snapshot_candidate(0)
    }

    /// Copy of the aggregate for one candidate, flagged as a delta. An unseen
    /// slot yields an empty assistant message.
    #[must_use]
    pub fn snapshot_candidate(&self, index: usize) -> CanonicalCompletion {
        self.build_completion(index, true)
    }

    /// The aggregate for candidate 0 as a final (non-delta) completion.
    #[must_use]
    pub fn completion(&self) -> CanonicalCompletion {
        self.build_completion(0, false)
    }

    /// Wrap one increment as a standalone delta completion.
    #[must_use]
    pub fn delta_completion(&self, increment: &CandidateIncrement) -> CanonicalCompletion {
        let mut message = self.empty_message();
        message.parts.extend(increment.parts.iter().cloned());
        CanonicalCompletion {
            delta: true,
            model: self.model.clone(),
            message,
            usage: self.usage,
        }
    }

    fn empty_message(&self) -> CanonicalMessage {
        CanonicalMessage {
            id: self
                .response_id
                .clone()
                .unwrap_or_else(|| self.message_id.clone()),
            role: CanonicalRole::Assistant,
            parts: smallvec::SmallVec::new(),
        }
    }

    fn build_completion(&self, index: usize, delta: bool) -> CanonicalCompletion {
        let mut message = self.empty_message();
        if let Some(Some(slot)) = self.slots.get(index) {
            message.parts.extend(slot.parts.iter().cloned());
            message
                .parts
                .extend(slot.pending_calls.iter().map(|call| {
                    CanonicalPart::ToolCall(CanonicalToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                }));
        }
        CanonicalCompletion {
            delta,
            model: self.model.clone(),
            message,
            usage: self.usage,
        }
    }
}

impl CandidateSlot {
    /// Split inline reasoning out of text parts when this slot's backend
    /// inlines it. The first update with content decides the source.
    fn route_reasoning(
        &mut self,
        parts: Vec<CanonicalPart>,
        markers: Option<Arc<[ReasoningMarker]>>,
    ) -> (Vec<CanonicalPart>, ExtractedText) {
        if self.source == ReasoningSource::Undecided {
            if parts
                .iter()
                .any(|part| matches!(part, CanonicalPart::Reasoning { .. }))
            {
                self.source = ReasoningSource::Explicit;
            } else if parts
                .iter()
                .any(|part| matches!(part, CanonicalPart::Text { text, .. } if !text.is_empty()))
            {
                self.source = ReasoningSource::Inline;
            }
        }

        let extract = self.source == ReasoningSource::Inline && markers.is_some();
        if extract && self.extractor.is_none() {
            if let Some(markers) = markers {
                self.extractor = Some(ReasoningExtractor::new(markers));
            }
        }

        let mut text = ExtractedText::default();
        let mut routed = Vec::with_capacity(parts.len());
        for part in parts {
            match (part, self.extractor.as_mut().filter(|_| extract)) {
                (CanonicalPart::Text { text: chunk, .. }, Some(extractor)) => {
                    let step = extractor.push(&chunk);
                    text.reasoning.push_str(&step.reasoning);
                    text.visible.push_str(&step.visible);
                    routed.extend(text_parts(&step));
                }
                (part, _) => {
                    match &part {
                        CanonicalPart::Text { text: chunk, .. } => text.visible.push_str(chunk),
                        CanonicalPart::Reasoning { text: chunk, .. } => {
                            text.reasoning.push_str(chunk);
                        }
                        _ => {}
                    }
                    routed.push(part);
                }
            }
        }
        (routed, text)
    }

    fn merge_fragment(&mut self, fragment: ToolCallFragment) -> bool {
        let call = match self
            .pending_calls
            .iter_mut()
            .position(|call| call.index == fragment.index)
        {
            Some(pos) => &mut self.pending_calls[pos],
            None => {
                self.pending_calls.push(PendingToolCall {
                    index: fragment.index,
                    ..PendingToolCall::default()
                });
                let last = self.pending_calls.len() - 1;
                &mut self.pending_calls[last]
            }
        };

        let mut changed = false;
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            changed |= call.id != id;
            call.id = id;
        }
        if let Some(name) = fragment.name.filter(|name| !name.is_empty()) {
            changed |= call.name != name;
            call.name = name;
        }
        if !fragment.arguments.is_empty() {
            call.arguments.push_str(&fragment.arguments);
            changed = true;
        }
        changed
    }
}

fn text_parts(text: &ExtractedText) -> Vec<CanonicalPart> {
    let mut parts = Vec::with_capacity(2);
    if !text.reasoning.is_empty() {
        parts.push(CanonicalPart::reasoning(text.reasoning.clone()));
    }
    if !text.visible.is_empty() {
        parts.push(CanonicalPart::text(text.visible.clone()));
    }
    parts
}

/// Merge one part into a slot's parts. Returns whether anything changed.
fn merge_part(parts: &mut Vec<CanonicalPart>, part: CanonicalPart) -> bool {
    let Some(kind) = part.text_kind() else {
        parts.push(part);
        return true;
    };

    let (incoming, signature) = match part {
        CanonicalPart::Text { ref text, .. } | CanonicalPart::Refusal { ref text } => {
            (text.as_str(), None)
        }
        CanonicalPart::Reasoning {
            ref text,
            ref signature,
        } => (text.as_str(), signature.as_deref()),
        _ => return false,
    };
    if incoming.is_empty() && signature.is_none() {
        return false;
    }

    let Some(existing) = parts.iter_mut().find(|p| p.text_kind() == Some(kind)) else {
        parts.push(part);
        return true;
    };
    match existing {
        CanonicalPart::Text { text, .. } | CanonicalPart::Refusal { text } => {
            text.push_str(incoming);
        }
        CanonicalPart::Reasoning {
            text,
            signature: existing_signature,
        } => {
            text.push_str(incoming);
            if let Some(signature) = signature {
                *existing_signature = Some(signature.to_owned());
            }
        }
        _ => {}
    }
    true
}

fn overwrite<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(value) if *slot != value => {
            *slot = value;
            true
        }
        _ => false,
    }
}

fn overwrite_opt<T: PartialEq>(slot: &mut Option<T>, value: Option<T>) -> bool {
    match value {
        Some(value) if slot.as_ref() != Some(&value) => {
            *slot = Some(value);
            true
        }
        _ => false,
    }
}
