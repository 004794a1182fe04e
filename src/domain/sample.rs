// ============================================================
// Layer 3 — Sample, InputDatum, Batch
// ============================================================
// A Sample is one (input, question, answer) triple.
//
// Many samples share the same input: every question asked
// about one scene points at that scene's image (or descriptor
// table). The input is therefore held behind an Arc and never
// copied when the dataset is expanded, shuffled or batched.
//
//   scene image ─┬─ Sample (question 1, answer 3)
//                ├─ Sample (question 2, answer 0)
//                └─ ...

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

// ─── InputDatum ───────────────────────────────────────────────────────────────
/// A dense row-major array of f32 values: an image or a descriptor table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDatum {
    pub shape:  Vec<usize>,
    pub values: Vec<f32>,
}

impl InputDatum {
    /// Returns None when the value count does not match the shape.
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Option<Self> {
        let expected: usize = shape.iter().product();
        (expected == values.len()).then_some(Self { shape, values })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Exchange two axes, materialising the transposed layout.
    ///
    /// `swap_axes(0, 2)` on an `[H, W, C]` image yields `[C, W, H]`,
    /// with `out[c][w][h] == in[h][w][c]`.
    pub fn swap_axes(&self, a: usize, b: usize) -> Self {
        let rank = self.rank();
        assert!(a < rank && b < rank, "axis out of range for rank {rank}");

        let mut strides = vec![1usize; rank];
        for axis in (0..rank.saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * self.shape[axis + 1];
        }

        let mut shape = self.shape.clone();
        shape.swap(a, b);
        strides.swap(a, b);

        let mut values = Vec::with_capacity(self.values.len());
        let mut index  = vec![0usize; rank];
        for _ in 0..self.values.len() {
            let offset: usize = index.iter().zip(&strides).map(|(i, s)| i * s).sum();
            values.push(self.values[offset]);

            // odometer increment over the new shape
            for axis in (0..rank).rev() {
                index[axis] += 1;
                if index[axis] < shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }

        Self { shape, values }
    }
}

// ─── Sample ───────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub input:    Arc<InputDatum>,
    /// Fixed-length encoded question vector
    pub question: Vec<f32>,
    /// Discrete answer class
    pub answer:   u32,
}

impl Sample {
    pub fn new(input: Arc<InputDatum>, question: Vec<f32>, answer: u32) -> Self {
        Self { input, question, answer }
    }
}

// ─── Category ─────────────────────────────────────────────────────────────────
/// How many objects a question relates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Three objects
    Ternary,
    /// Two objects ("relational")
    Binary,
    /// A single object property ("non-relational")
    Unary,
}

impl Category {
    /// Fixed per-batch processing order.
    pub const ALL: [Category; 3] = [Category::Ternary, Category::Binary, Category::Unary];

    pub fn index(self) -> usize {
        match self {
            Category::Ternary => 0,
            Category::Binary  => 1,
            Category::Unary   => 2,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Ternary => "ternary",
            Category::Binary  => "relational",
            Category::Unary   => "non-relational",
        })
    }
}

// ─── Batch ────────────────────────────────────────────────────────────────────
/// Three aligned sequences sliced from one category. Built fresh
/// for every batch index and dropped after the step that uses it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    pub inputs:    Vec<Arc<InputDatum>>,
    pub questions: Vec<Vec<f32>>,
    pub answers:   Vec<u32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}
