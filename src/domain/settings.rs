// ============================================================
// Layer 3 — Run Settings Vocabulary
// ============================================================
// Closed sets of values chosen once per run: which model
// family, which relation arity the RN reasons over, and which
// input representation the dataset carries.
//
// Each type implements FromStr + Display so the CLI layer can
// parse them directly and file names can embed them.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelVariant {
    RelationNetwork,
    CnnMlp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationType {
    Binary,
    Ternary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputType {
    Pixels,
    Descriptors,
}

impl InputType {
    /// Dataset file the generator writes for this representation.
    pub fn dataset_file_name(self) -> &'static str {
        match self {
            InputType::Pixels      => "sort-of-clevr.pickle",
            InputType::Descriptors => "sort-of-clevr-descriptors.pickle",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelVariant::RelationNetwork => "RN",
            ModelVariant::CnnMlp          => "CNN_MLP",
        })
    }
}

impl FromStr for ModelVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "rn" | "relation_network" => Ok(ModelVariant::RelationNetwork),
            "cnn_mlp"                 => Ok(ModelVariant::CnnMlp),
            other => Err(format!("unknown model '{other}' (expected RN or CNN_MLP)")),
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelationType::Binary  => "binary",
            RelationType::Ternary => "ternary",
        })
    }
}

impl FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary"  => Ok(RelationType::Binary),
            "ternary" => Ok(RelationType::Ternary),
            other => Err(format!("unknown relation type '{other}' (expected binary or ternary)")),
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputType::Pixels      => "pixels",
            InputType::Descriptors => "descriptors",
        })
    }
}

impl FromStr for InputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pixels"      => Ok(InputType::Pixels),
            "descriptors" => Ok(InputType::Descriptors),
            other => Err(format!("unknown input type '{other}' (expected pixels or descriptors)")),
        }
    }
}
