use crate::domain::error::{TrainError, TrainResult};
use crate::domain::sample::{Category, Sample};

/// The three category lists of one split (train or test).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategorySplit {
    pub ternary: Vec<Sample>,
    pub binary:  Vec<Sample>,
    pub unary:   Vec<Sample>,
}

impl CategorySplit {
    pub fn get(&self, category: Category) -> &[Sample] {
        match category {
            Category::Ternary => &self.ternary,
            Category::Binary  => &self.binary,
            Category::Unary   => &self.unary,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut Vec<Sample> {
        match category {
            Category::Ternary => &mut self.ternary,
            Category::Binary  => &mut self.binary,
            Category::Unary   => &mut self.unary,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.ternary.len() + self.binary.len() + self.unary.len()
    }

    /// Relational and non-relational lists must be equally long
    /// before an epoch phase may run over them.
    pub fn check_balanced(&self, split: &'static str) -> TrainResult<()> {
        if self.binary.len() == self.unary.len() {
            Ok(())
        } else {
            Err(TrainError::CategoryLengthMismatch {
                split,
                relational:     self.binary.len(),
                non_relational: self.unary.len(),
            })
        }
    }
}

/// Six ordered lists: {ternary, relational, non-relational} × {train, test}.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortOfClevr {
    pub train: CategorySplit,
    pub test:  CategorySplit,
}

impl SortOfClevr {
    fn first_sample(&self) -> Option<&Sample> {
        Category::ALL
            .iter()
            .flat_map(|&c| [self.train.get(c).first(), self.test.get(c).first()])
            .flatten()
            .next()
    }

    /// Shape shared by every input in the run.
    pub fn input_shape(&self) -> Option<&[usize]> {
        self.first_sample().map(|s| s.input.shape.as_slice())
    }

    pub fn question_len(&self) -> Option<usize> {
        self.first_sample().map(|s| s.question.len())
    }
}
