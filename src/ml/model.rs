use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
        PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::relu,
};
use serde::{Deserialize, Serialize};

// ─── Input layout ─────────────────────────────────────────────────────────────
/// Shape of one input, as found in the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputLayout {
    /// `[channels, height, width]` image
    Pixels { channels: usize, height: usize, width: usize },
    /// `[objects, features]` descriptor table
    Descriptors { objects: usize, features: usize },
}

impl InputLayout {
    pub fn from_shape(shape: &[usize]) -> Option<Self> {
        match *shape {
            [channels, height, width] => Some(Self::Pixels { channels, height, width }),
            [objects, features]       => Some(Self::Descriptors { objects, features }),
            _ => None,
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match *self {
            Self::Pixels { channels, height, width } => vec![channels, height, width],
            Self::Descriptors { objects, features }  => vec![objects, features],
        }
    }
}

/// Batched model input, one variant per layout.
pub enum ModelInput<B: Backend> {
    Pixels(Tensor<B, 4>),
    Descriptors(Tensor<B, 3>),
}

/// Anything that maps (inputs, questions) to answer logits `[batch, classes]`.
pub trait Classifier<B: Backend> {
    fn forward(&self, input: ModelInput<B>, questions: Tensor<B, 2>) -> Tensor<B, 2>;
}

// ─── Convolutional object extractor ───────────────────────────────────────────
// 4 × (conv 3x3 stride 2 pad 1 → batch norm → ReLU).
// A 75x75 scene ends up as a 5x5 grid of `channels`-wide cells,
// each cell treated as one "object".
const CONV_LAYERS: usize = 4;

fn conv_side(side: usize) -> usize {
    (0..CONV_LAYERS).fold(side, |s, _| (s + 2 - 3) / 2 + 1)
}

#[derive(Module, Debug)]
pub struct ConvInput<B: Backend> {
    convs: Vec<Conv2d<B>>,
    norms: Vec<BatchNorm<B, 2>>,
}

impl<B: Backend> ConvInput<B> {
    pub fn new(in_channels: usize, channels: usize, device: &B::Device) -> Self {
        let convs = (0..CONV_LAYERS)
            .map(|i| {
                let input = if i == 0 { in_channels } else { channels };
                Conv2dConfig::new([input, channels], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device)
            })
            .collect();
        let norms = (0..CONV_LAYERS)
            .map(|_| BatchNormConfig::new(channels).init(device))
            .collect();
        Self { convs, norms }
    }

    /// `[batch, C, H, W]` → `[batch, channels, H', W']`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.convs
            .iter()
            .zip(&self.norms)
            .fold(images, |x, (conv, norm)| relu(norm.forward(conv.forward(x))))
    }
}

/// Output classifier shared by both models: fc → ReLU → dropout → fc.
#[derive(Module, Debug)]
pub struct OutputHead<B: Backend> {
    fc2:     Linear<B>,
    fc3:     Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> OutputHead<B> {
    fn new(hidden: usize, classes: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            fc2:     LinearConfig::new(hidden, hidden).init(device),
            fc3:     LinearConfig::new(hidden, classes).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.dropout.forward(relu(self.fc2.forward(x)));
        self.fc3.forward(x)
    }
}

// ─── Relation Network ─────────────────────────────────────────────────────────
// RN(O, q) = f( Σ_{i,j} g(o_j, o_i, q) )            binary
// RN(O, q) = f( Σ_{i,j,k} g(o_k, o_j, o_i, q) )     ternary
//
// Pixel inputs: objects are conv grid cells with their (row, col)
// coordinates appended. Descriptor inputs: one object per row.
#[derive(Config, Debug)]
pub struct RelationNetworkConfig {
    pub layout:       InputLayout,
    pub question_dim: usize,
    pub classes:      usize,
    /// Reason over object triples instead of pairs
    pub ternary:      bool,
    #[config(default = 24)]
    pub conv_channels: usize,
    #[config(default = 256)]
    pub hidden:       usize,
    #[config(default = 0.5)]
    pub dropout:      f64,
}

impl RelationNetworkConfig {
    /// Width of one object vector fed to g.
    pub fn object_dim(&self) -> usize {
        match self.layout {
            InputLayout::Pixels { .. }               => self.conv_channels + 2,
            InputLayout::Descriptors { features, .. } => features,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> RelationNetwork<B> {
        let arity = if self.ternary { 3 } else { 2 };
        let g_in  = arity * self.object_dim() + self.question_dim;

        let conv = match self.layout {
            InputLayout::Pixels { channels, .. } => {
                Some(ConvInput::new(channels, self.conv_channels, device))
            }
            InputLayout::Descriptors { .. } => None,
        };
        let g = (0..4)
            .map(|i| {
                let input = if i == 0 { g_in } else { self.hidden };
                LinearConfig::new(input, self.hidden).init(device)
            })
            .collect();

        RelationNetwork {
            conv,
            g,
            f_fc1:   LinearConfig::new(self.hidden, self.hidden).init(device),
            head:    OutputHead::new(self.hidden, self.classes, self.dropout, device),
            ternary: self.ternary,
        }
    }
}

#[derive(Module, Debug)]
pub struct RelationNetwork<B: Backend> {
    conv:    Option<ConvInput<B>>,
    g:       Vec<Linear<B>>,
    f_fc1:   Linear<B>,
    head:    OutputHead<B>,
    ternary: bool,
}

impl<B: Backend> RelationNetwork<B> {
    /// `[batch, objects, object_dim]`
    fn objects(&self, input: ModelInput<B>) -> Tensor<B, 3> {
        match input {
            ModelInput::Pixels(images) => {
                let features = match &self.conv {
                    Some(conv) => conv.forward(images),
                    None       => images,
                };
                let [batch, channels, height, width] = features.dims();
                let cells = features
                    .reshape([batch, channels, height * width])
                    .swap_dims(1, 2);
                let coords = grid_coordinates::<B>(height, width, &cells.device())
                    .unsqueeze::<3>()
                    .expand([batch, height * width, 2]);
                Tensor::cat(vec![cells, coords], 2)
            }
            ModelInput::Descriptors(table) => table,
        }
    }

    /// All object tuples with the question appended, one per row.
    fn relations(&self, objects: Tensor<B, 3>, questions: Tensor<B, 2>) -> (Tensor<B, 2>, usize) {
        let [batch, n, d] = objects.dims();
        let q = questions.dims()[1];

        if self.ternary {
            let o_k = objects.clone().reshape([batch, 1, 1, n, d]).expand([batch, n, n, n, d]);
            let o_j = objects.clone().reshape([batch, 1, n, 1, d]).expand([batch, n, n, n, d]);
            let o_i = objects.reshape([batch, n, 1, 1, d]).expand([batch, n, n, n, d]);
            let qst = questions.reshape([batch, 1, 1, 1, q]).expand([batch, n, n, n, q]);
            let rows = Tensor::cat(vec![o_k, o_j, o_i, qst], 4)
                .reshape([batch * n * n * n, 3 * d + q]);
            (rows, n * n * n)
        } else {
            let o_j = objects.clone().reshape([batch, 1, n, d]).expand([batch, n, n, d]);
            let o_i = objects.reshape([batch, n, 1, d]).expand([batch, n, n, d]);
            let qst = questions.reshape([batch, 1, 1, q]).expand([batch, n, n, q]);
            let rows = Tensor::cat(vec![o_j, o_i, qst], 3).reshape([batch * n * n, 2 * d + q]);
            (rows, n * n)
        }
    }
}

impl<B: Backend> Classifier<B> for RelationNetwork<B> {
    fn forward(&self, input: ModelInput<B>, questions: Tensor<B, 2>) -> Tensor<B, 2> {
        let batch   = questions.dims()[0];
        let objects = self.objects(input);
        let (rows, per_sample) = self.relations(objects, questions);

        let mut x = rows;
        for layer in &self.g {
            x = relu(layer.forward(x));
        }
        let hidden = x.dims()[1];

        // element-wise sum over all relations of one sample
        let summed = x
            .reshape([batch, per_sample, hidden])
            .sum_dim(1)
            .reshape([batch, hidden]);

        self.head.forward(relu(self.f_fc1.forward(summed)))
    }
}

/// `[(rows * cols), 2]` cell centres, `((r - (rows-1)/2) / 2, (c - (cols-1)/2) / 2)`.
fn grid_coordinates<B: Backend>(rows: usize, cols: usize, device: &B::Device) -> Tensor<B, 2> {
    let mid_r = (rows as f32 - 1.0) / 2.0;
    let mid_c = (cols as f32 - 1.0) / 2.0;
    let values: Vec<f32> = (0..rows * cols)
        .flat_map(|i| {
            let (r, c) = ((i / cols) as f32, (i % cols) as f32);
            [(r - mid_r) / 2.0, (c - mid_c) / 2.0]
        })
        .collect();
    Tensor::from_data(TensorData::new(values, [rows * cols, 2]), device)
}

// ─── CNN + MLP baseline ───────────────────────────────────────────────────────
// Flatten the conv feature map (or the descriptor table), append
// the question, then a plain MLP. No relational inductive bias.
#[derive(Config, Debug)]
pub struct CnnMlpConfig {
    pub layout:       InputLayout,
    pub question_dim: usize,
    pub classes:      usize,
    #[config(default = 24)]
    pub conv_channels: usize,
    #[config(default = 256)]
    pub hidden:       usize,
    #[config(default = 0.5)]
    pub dropout:      f64,
}

impl CnnMlpConfig {
    pub fn flat_dim(&self) -> usize {
        match self.layout {
            InputLayout::Pixels { height, width, .. } => {
                self.conv_channels * conv_side(height) * conv_side(width)
            }
            InputLayout::Descriptors { objects, features } => objects * features,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> CnnMlp<B> {
        let conv = match self.layout {
            InputLayout::Pixels { channels, .. } => {
                Some(ConvInput::new(channels, self.conv_channels, device))
            }
            InputLayout::Descriptors { .. } => None,
        };
        CnnMlp {
            conv,
            fc1:  LinearConfig::new(self.flat_dim() + self.question_dim, self.hidden).init(device),
            head: OutputHead::new(self.hidden, self.classes, self.dropout, device),
        }
    }
}

#[derive(Module, Debug)]
pub struct CnnMlp<B: Backend> {
    conv: Option<ConvInput<B>>,
    fc1:  Linear<B>,
    head: OutputHead<B>,
}

impl<B: Backend> Classifier<B> for CnnMlp<B> {
    fn forward(&self, input: ModelInput<B>, questions: Tensor<B, 2>) -> Tensor<B, 2> {
        let flat: Tensor<B, 2> = match input {
            ModelInput::Pixels(images) => match &self.conv {
                Some(conv) => conv.forward(images).flatten(1, 3),
                None       => images.flatten(1, 3),
            },
            ModelInput::Descriptors(table) => table.flatten(1, 2),
        };
        let x = Tensor::cat(vec![flat, questions], 1);
        self.head.forward(relu(self.fc1.forward(x)))
    }
}
