// ============================================================
// Layer 4 — Batch Reshaper
// ============================================================
// Two pure steps turn a category list into model batches:
//
//   axis_convert:  [(input, question, answer), ...]
//                      → (inputs[], questions[], answers[])
//
//   slice_batch:   columns, i, b
//                      → rows [i*b, (i+1)*b) of every column
//
// The number of batches per epoch is `len / batch_size`
// (floor division). When the length is not a multiple of the
// batch size the tail rows are simply never visited.
//
// Inputs are Arc-shared, so slicing clones pointers, not images.
// Tensor creation happens later, in Layer 5.

use std::sync::Arc;

use crate::domain::sample::{Batch, InputDatum, Sample};

// ─── Columns ──────────────────────────────────────────────────────────────────
/// A category list rearranged into three parallel sequences.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Columns {
    pub inputs:    Vec<Arc<InputDatum>>,
    pub questions: Vec<Vec<f32>>,
    pub answers:   Vec<u32>,
}

impl Columns {
    pub fn len(&self) -> usize {
        self.answers.len()
    }
}

/// Split a list of samples into (inputs, questions, answers) without loss.
pub fn axis_convert(samples: &[Sample]) -> Columns {
    let mut columns = Columns {
        inputs:    Vec::with_capacity(samples.len()),
        questions: Vec::with_capacity(samples.len()),
        answers:   Vec::with_capacity(samples.len()),
    };
    for s in samples {
        columns.inputs.push(Arc::clone(&s.input));
        columns.questions.push(s.question.clone());
        columns.answers.push(s.answer);
    }
    columns
}

/// Number of full batches: `len / batch_size`.
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 { 0 } else { len / batch_size }
}

/// Rows `[batch_index * batch_size, (batch_index + 1) * batch_size)`.
///
/// The range is clamped to the column length, so an index past the
/// end of a shorter list yields a short or empty batch.
pub fn slice_batch(columns: &Columns, batch_index: usize, batch_size: usize) -> Batch {
    let len   = columns.len();
    let start = batch_index.saturating_mul(batch_size).min(len);
    let end   = start.saturating_add(batch_size).min(len);

    Batch {
        inputs:    columns.inputs[start..end].to_vec(),
        questions: columns.questions[start..end].to_vec(),
        answers:   columns.answers[start..end].to_vec(),
    }
}
