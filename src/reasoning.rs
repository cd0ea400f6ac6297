//! Separates model reasoning from the answer in streamed output.
//!
//! Reasoning models wrap their chain of thought in `<think>...</think>`
//! (DeepSeek-R1) or `<thought>...</thought>`. Tags can arrive split over
//! several fragments, so a possible partial tag at the end of a fragment
//! is held back until the next one decides it.

const TAGS: &[(&str, &str)] = &[("<think>", "</think>"), ("<thought>", "</thought>")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Answer(String),
    Reasoning(String),
}

#[derive(Debug, Default)]
pub struct ReasoningSplitter {
    buffer: String,
    /// Closing tag we are waiting for while inside a reasoning span.
    closing: Option<&'static str>,
}

impl ReasoningSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment and get back whatever can be classified so far.
    pub fn push(&mut self, fragment: &str) -> Vec<Segment> {
        self.buffer.push_str(fragment);
        let mut out = Vec::new();

        loop {
            match self.closing {
                None => {
                    let next_open = TAGS
                        .iter()
                        .filter_map(|(open, close)| {
                            self.buffer.find(open).map(|pos| (pos, *open, *close))
                        })
                        .min_by_key(|(pos, _, _)| *pos);
                    match next_open {
                        Some((pos, open, close)) => {
                            emit(&mut out, Segment::Answer(self.buffer[..pos].to_string()));
                            self.buffer.drain(..pos + open.len());
                            self.closing = Some(close);
                        }
                        None => {
                            let keep = partial_tag_start(&self.buffer, TAGS.iter().map(|(o, _)| *o));
                            let ready: String = self.buffer.drain(..keep).collect();
                            emit(&mut out, Segment::Answer(ready));
                            break;
                        }
                    }
                }
                Some(close) => match self.buffer.find(close) {
                    Some(pos) => {
                        emit(&mut out, Segment::Reasoning(self.buffer[..pos].to_string()));
                        self.buffer.drain(..pos + close.len());
                        self.closing = None;
                    }
                    None => {
                        let keep = partial_tag_start(&self.buffer, std::iter::once(close));
                        let ready: String = self.buffer.drain(..keep).collect();
                        emit(&mut out, Segment::Reasoning(ready));
                        break;
                    }
                },
            }
        }
        out
    }

    /// Flush held-back text at end of stream. An unterminated reasoning
    /// span stays reasoning.
    pub fn finish(&mut self) -> Vec<Segment> {
        let rest = std::mem::take(&mut self.buffer);
        let mut out = Vec::new();
        match self.closing.take() {
            None => emit(&mut out, Segment::Answer(rest)),
            Some(_) => emit(&mut out, Segment::Reasoning(rest)),
        }
        out
    }
}

fn emit(out: &mut Vec<Segment>, segment: Segment) {
    let empty = match &segment {
        Segment::Answer(s) | Segment::Reasoning(s) => s.is_empty(),
    };
    if !empty {
        out.push(segment);
    }
}

/// Byte offset where a trailing prefix of one of `tags` begins, or the
/// buffer length when the tail cannot start a tag.
fn partial_tag_start<'a>(buffer: &str, mut tags: impl Iterator<Item = &'a str>) -> usize {
    if let Some(pos) = buffer.rfind('<') {
        let tail = &buffer[pos..];
        if tags.any(|t| tail.len() < t.len() && t.starts_with(tail)) {
            return pos;
        }
    }
    buffer.len()
}
