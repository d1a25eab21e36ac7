//! Folds a stream of [`StreamChunk`]s into one [`AssistantTurn`].
//!
//! Tool-call deltas accumulate *by ID*: a later delta with a known ID
//! appends to that call's argument buffer and may fill in a name that was
//! previously empty. Call order is first-seen order.

use std::collections::HashMap;

use super::types::{AssistantTurn, FinishReason, StreamChunk, ToolCall, Usage};

#[derive(Default)]
pub struct ResponseAccumulator {
    text: String,
    calls: Vec<ToolCall>,
    index_by_id: HashMap<String, usize>,
    usage: Option<Usage>,
    finish_reason: Option<FinishReason>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::TextDelta(delta) => self.text.push_str(&delta),
            StreamChunk::ToolCallDelta { id, name, arguments } => {
                match self.index_by_id.get(&id) {
                    Some(&i) => {
                        let call = &mut self.calls[i];
                        call.arguments.push_str(&arguments);
                        if call.name.is_empty()
                            && let Some(name) = name
                        {
                            call.name = name;
                        }
                    }
                    None => {
                        self.index_by_id.insert(id.clone(), self.calls.len());
                        self.calls.push(ToolCall {
                            id,
                            name: name.unwrap_or_default(),
                            arguments,
                        });
                    }
                }
            }
            StreamChunk::Usage(usage) => self.usage = Some(usage),
            StreamChunk::Done { finish_reason } => self.finish_reason = Some(finish_reason),
        }
    }

    pub fn finish(self) -> AssistantTurn {
        AssistantTurn {
            text: self.text,
            tool_calls: self.calls,
            usage: self.usage,
            finish_reason: self.finish_reason.unwrap_or(FinishReason::Stop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_deltas_concatenate() {
        let mut acc = ResponseAccumulator::new();
        acc.push(StreamChunk::TextDelta("Hel".into()));
        acc.push(StreamChunk::TextDelta("lo".into()));
        acc.push(StreamChunk::Done { finish_reason: FinishReason::Stop });
        let turn = acc.finish();
        assert_eq!(turn.text, "Hello");
        assert_eq!(turn.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn tool_call_deltas_accumulate_by_id() {
        let mut acc = ResponseAccumulator::new();
        acc.push(StreamChunk::ToolCallDelta {
            id: "c1".into(),
            name: Some("read_file".into()),
            arguments: r#"{"pa"#.into(),
        });
        acc.push(StreamChunk::ToolCallDelta {
            id: "c1".into(),
            name: None,
            arguments: r#"th":"x"}"#.into(),
        });
        acc.push(StreamChunk::Done { finish_reason: FinishReason::ToolCalls });

        let turn = acc.finish();
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "read_file");
        assert_eq!(turn.tool_calls[0].arguments, r#"{"path":"x"}"#);
    }

    #[test]
    fn late_name_fills_empty_slot_only() {
        let mut acc = ResponseAccumulator::new();
        acc.push(StreamChunk::ToolCallDelta {
            id: "c1".into(),
            name: None,
            arguments: "{".into(),
        });
        acc.push(StreamChunk::ToolCallDelta {
            id: "c1".into(),
            name: Some("bash".into()),
            arguments: "}".into(),
        });
        acc.push(StreamChunk::ToolCallDelta {
            id: "c1".into(),
            name: Some("other".into()),
            arguments: "".into(),
        });
        let turn = acc.finish();
        assert_eq!(turn.tool_calls[0].name, "bash", "existing name is not overwritten");
    }

    #[test]
    fn multiple_calls_keep_first_seen_order() {
        let mut acc = ResponseAccumulator::new();
        for id in ["a", "b", "c"] {
            acc.push(StreamChunk::ToolCallDelta {
                id: id.into(),
                name: Some(format!("tool_{id}")),
                arguments: "{}".into(),
            });
        }
        // Interleaved continuation for the first call.
        acc.push(StreamChunk::ToolCallDelta {
            id: "a".into(),
            name: None,
            arguments: "".into(),
        });
        let turn = acc.finish();
        let names: Vec<_> = turn.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["tool_a", "tool_b", "tool_c"]);
    }

    #[test]
    fn usage_is_captured() {
        let mut acc = ResponseAccumulator::new();
        acc.push(StreamChunk::Usage(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }));
        let turn = acc.finish();
        assert_eq!(turn.usage.unwrap().total_tokens, 15);
    }
}
