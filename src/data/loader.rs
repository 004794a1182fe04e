// ============================================================
// Layer 4 — Dataset Loader
// ============================================================
// Reads the sort-of-CLEVR pickle written by the generator and
// expands it into six flat sample lists.
//
// File layout:
//
//   (train_records, test_records)
//     record = (input, ternary_bundle, relational_bundle, non_relational_bundle)
//     bundle = (questions, answers)      len(questions) == len(answers)
//
// `input` is a numpy array or a nested list of numbers:
//   pixels      → [H][W][C] image, stored with axes 0 and 2 swapped
//                 to [C][W][H] before use
//   descriptors → [objects][features] table, used as is
// Questions are flat vectors in the same forms; answers are ints
// or numpy integer scalars.
//
// Every (question, answer) pair in a bundle becomes its own
// Sample pointing at the record's shared input.
//
// The pickle is run through the stack machine in pickle.rs and
// the resulting tree is walked by hand, so objects shared through
// the memo are read as often as they are referenced and a
// malformed file is reported with the record index and field at
// fault.

use std::{path::PathBuf, sync::Arc};

use crate::data::dataset::{CategorySplit, SortOfClevr};
use crate::data::numpy;
use crate::data::pickle::{Node, NodeId, PickleTree};
use crate::domain::error::{TrainError, TrainResult};
use crate::domain::sample::{Category, InputDatum, Sample};
use crate::domain::settings::InputType;

/// Deepest list nesting accepted for one array.
const MAX_NESTING: usize = 16;

/// Loads `sort-of-clevr*.pickle` from a data directory.
pub struct SortOfClevrLoader {
    dir:        PathBuf,
    input_type: InputType,
}

impl SortOfClevrLoader {
    pub fn new(dir: impl Into<PathBuf>, input_type: InputType) -> Self {
        Self { dir: dir.into(), input_type }
    }

    /// File chosen by the input-type flag.
    pub fn dataset_path(&self) -> PathBuf {
        self.dir.join(self.input_type.dataset_file_name())
    }

    pub fn load(&self) -> TrainResult<SortOfClevr> {
        let path = self.dataset_path();
        tracing::info!("Loading data from '{}'", path.display());

        let bytes = std::fs::read(&path)
            .map_err(|e| TrainError::data_format(&path, format!("cannot open: {e}")))?;
        let tree = PickleTree::parse(&bytes)
            .map_err(|e| TrainError::data_format(&path, format!("cannot unpickle: {e}")))?;

        tracing::info!("Processing data...");
        let data = self
            .expand(&tree)
            .map_err(|message| TrainError::data_format(&path, message))?;

        tracing::info!(
            "Loaded {} train samples ({} ternary, {} relational, {} non-relational), \
             {} test samples",
            data.train.sample_count(),
            data.train.ternary.len(),
            data.train.binary.len(),
            data.train.unary.len(),
            data.test.sample_count(),
        );
        Ok(data)
    }

    fn expand(&self, tree: &PickleTree) -> Result<SortOfClevr, String> {
        let splits = sequence(tree, tree.root(), "dataset root")?;
        if splits.len() != 2 {
            return Err(format!(
                "expected (train_records, test_records), found {} items",
                splits.len()
            ));
        }

        let mut shapes = ShapeGuard::default();
        let train = self.expand_split(tree, splits[0], "train", &mut shapes)?;
        let test  = self.expand_split(tree, splits[1], "test", &mut shapes)?;
        Ok(SortOfClevr { train, test })
    }

    fn expand_split(
        &self,
        tree:    &PickleTree,
        records: NodeId,
        split:   &str,
        shapes:  &mut ShapeGuard,
    ) -> Result<CategorySplit, String> {
        let mut out = CategorySplit::default();

        for (i, &record) in sequence(tree, records, split)?.iter().enumerate() {
            let at = |field: &str| format!("{split} record {i}: {field}");

            let fields = sequence(tree, record, &at("record"))?;
            if fields.len() != 4 {
                return Err(format!(
                    "{}: expected (input, ternary, relational, non_relational), found {} items",
                    at("record"),
                    fields.len()
                ));
            }

            let input = self.read_input(tree, fields[0]).map_err(|e| format!("{}: {e}", at("input")))?;
            shapes.check_input(&input.shape).map_err(|e| format!("{}: {e}", at("input")))?;
            let input = Arc::new(input);

            for (category, &bundle) in Category::ALL.into_iter().zip(&fields[1..]) {
                let field = at(&format!("{category} bundle"));
                let (questions, answers) =
                    read_bundle(tree, bundle).map_err(|e| format!("{field}: {e}"))?;

                let list = out.get_mut(category);
                for (question, answer) in questions.into_iter().zip(answers) {
                    shapes
                        .check_question(question.len())
                        .map_err(|e| format!("{field}: {e}"))?;
                    list.push(Sample::new(Arc::clone(&input), question, answer));
                }
            }
        }

        Ok(out)
    }

    fn read_input(&self, tree: &PickleTree, id: NodeId) -> Result<InputDatum, String> {
        let datum = read_array(tree, id)?;
        match self.input_type {
            InputType::Pixels if datum.rank() == 3 => Ok(datum.swap_axes(0, 2)),
            InputType::Pixels => Err(format!("expected a rank-3 image, found rank {}", datum.rank())),
            InputType::Descriptors if datum.rank() == 2 => Ok(datum),
            InputType::Descriptors => Err(format!(
                "expected a rank-2 descriptor table, found rank {}",
                datum.rank()
            )),
        }
    }
}

// ─── Shape consistency ────────────────────────────────────────────────────────
/// All inputs in a run share one shape, all questions one length.
#[derive(Default)]
struct ShapeGuard {
    input:    Option<Vec<usize>>,
    question: Option<usize>,
}

impl ShapeGuard {
    fn check_input(&mut self, shape: &[usize]) -> Result<(), String> {
        match &self.input {
            None => {
                self.input = Some(shape.to_vec());
                Ok(())
            }
            Some(expected) if expected == shape => Ok(()),
            Some(expected) => Err(format!("shape {shape:?} differs from {expected:?}")),
        }
    }

    fn check_question(&mut self, len: usize) -> Result<(), String> {
        match self.question {
            None => {
                self.question = Some(len);
                Ok(())
            }
            Some(expected) if expected == len => Ok(()),
            Some(expected) => Err(format!("question length {len} differs from {expected}")),
        }
    }
}

// ─── Tree walking ─────────────────────────────────────────────────────────────
fn sequence<'t>(tree: &'t PickleTree, id: NodeId, what: &str) -> Result<&'t [NodeId], String> {
    tree.items(id)
        .ok_or_else(|| format!("{what}: expected a list or tuple, found {}", tree.kind(id)))
}

fn read_bundle(tree: &PickleTree, bundle: NodeId) -> Result<(Vec<Vec<f32>>, Vec<u32>), String> {
    let parts = sequence(tree, bundle, "bundle")?;
    if parts.len() != 2 {
        return Err(format!("expected (questions, answers), found {} items", parts.len()));
    }

    let questions = sequence(tree, parts[0], "questions")?
        .iter()
        .map(|&q| {
            let datum = read_array(tree, q)?;
            if datum.rank() == 1 {
                Ok(datum.values)
            } else {
                Err(format!("question must be a flat vector, found rank {}", datum.rank()))
            }
        })
        .collect::<Result<Vec<_>, String>>()?;

    let answers = sequence(tree, parts[1], "answers")?
        .iter()
        .map(|&a| label(tree, a))
        .collect::<Result<Vec<_>, String>>()?;

    if questions.len() != answers.len() {
        return Err(format!(
            "{} questions but {} answers",
            questions.len(),
            answers.len()
        ));
    }
    Ok((questions, answers))
}

/// Flatten a numpy array, or a rectangular nested list of numbers
/// and arrays, into an InputDatum.
fn read_array(tree: &PickleTree, id: NodeId) -> Result<InputDatum, String> {
    let mut walk = ArrayWalk::default();
    walk.collect(tree, id, 0)?;

    // a scalar on its own is not an array
    if walk.shape.is_empty() {
        return Err("expected an array or a nested list, found a scalar".to_string());
    }
    InputDatum::new(walk.shape, walk.values).ok_or_else(|| "ragged nested list".to_string())
}

#[derive(Default)]
struct ArrayWalk {
    shape:      Vec<usize>,
    values:     Vec<f32>,
    /// Depth at which numbers sit, fixed by the first one seen
    leaf_depth: Option<usize>,
}

impl ArrayWalk {
    fn collect(&mut self, tree: &PickleTree, id: NodeId, depth: usize) -> Result<(), String> {
        if depth > MAX_NESTING {
            return Err(format!("lists nested deeper than {MAX_NESTING} levels"));
        }

        if let Some(items) = tree.items(id) {
            if self.leaf_depth.is_some_and(|d| d <= depth) {
                return Err("ragged nested list".to_string());
            }
            self.axis(depth, &[items.len()])?;
            for &item in items {
                self.collect(tree, item, depth + 1)?;
            }
            return Ok(());
        }

        if let Some(array) = numpy::ndarray(tree, id)? {
            self.leaf(depth + array.rank())?;
            self.axis(depth, &array.shape)?;
            self.values.extend(array.values);
            return Ok(());
        }

        self.leaf(depth)?;
        if depth != self.shape.len() {
            return Err("ragged nested list".to_string());
        }
        self.values.push(number(tree, id)?);
        Ok(())
    }

    /// Record or check the lengths of axes `depth..depth + lens.len()`.
    fn axis(&mut self, depth: usize, lens: &[usize]) -> Result<(), String> {
        if depth == self.shape.len() {
            self.shape.extend_from_slice(lens);
            return Ok(());
        }
        match self.shape.get(depth..depth + lens.len()) {
            Some(known) if known == lens => Ok(()),
            Some(known) => Err(format!(
                "ragged nested list: axis {depth} has lengths {} and {}",
                known[0],
                lens[0]
            )),
            None => Err("ragged nested list".to_string()),
        }
    }

    fn leaf(&mut self, depth: usize) -> Result<(), String> {
        match self.leaf_depth {
            None => {
                self.leaf_depth = Some(depth);
                Ok(())
            }
            Some(d) if d == depth => Ok(()),
            Some(_) => Err("ragged nested list".to_string()),
        }
    }
}

fn number(tree: &PickleTree, id: NodeId) -> Result<f32, String> {
    match tree.node(id) {
        Node::Float(v) => Ok(*v as f32),
        Node::Int(v)   => Ok(*v as f32),
        Node::Bool(b)  => Ok(if *b { 1.0 } else { 0.0 }),
        _ => match numpy::scalar(tree, id)? {
            Some(v) => Ok(v as f32),
            None => Err(format!("expected a number, found {}", tree.kind(id))),
        },
    }
}

fn label(tree: &PickleTree, id: NodeId) -> Result<u32, String> {
    let value = match tree.node(id) {
        Node::Int(v)  => *v as f64,
        Node::Bool(b) => f64::from(u8::from(*b)),
        Node::Float(v) => *v,
        _ => numpy::scalar(tree, id)?
            .ok_or_else(|| format!("expected an integer answer, found {}", tree.kind(id)))?,
    };
    if value.fract() != 0.0 || value < 0.0 || value > f64::from(u32::MAX) {
        return Err(format!("answer {value} is not a valid class index"));
    }
    Ok(value as u32)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use std::{fs::File, io::BufWriter, path::Path};

    use serde::Serialize;
    use serde_pickle::SerOptions;

    use super::*;
    use crate::data::numpy::tests::{emit_f8_array, emit_i8_scalar};
    use crate::data::pickle::tests::Emitter;

    pub type Bundle = (Vec<Vec<f32>>, Vec<u32>);

    /// Write `(train, test)` records to `dir/<dataset file>` as a pickle.
    pub fn write_pickle<I: Serialize>(
        dir:        &Path,
        input_type: InputType,
        train:      Vec<(I, Bundle, Bundle, Bundle)>,
        test:       Vec<(I, Bundle, Bundle, Bundle)>,
    ) {
        let file = File::create(dir.join(input_type.dataset_file_name())).unwrap();
        serde_pickle::to_writer(&mut BufWriter::new(file), &(train, test), SerOptions::new())
            .unwrap();
    }

    pub fn bundle(n: usize, q_len: usize, first_answer: u32) -> Bundle {
        let questions = (0..n).map(|i| vec![i as f32; q_len]).collect();
        let answers   = (0..n as u32).map(|i| first_answer + i).collect();
        (questions, answers)
    }

    /// `[H][W][C]` image with value 100*h + 10*w + c
    fn image(h: usize, w: usize, c: usize) -> Vec<Vec<Vec<f32>>> {
        (0..h)
            .map(|y| (0..w).map(|x| (0..c).map(|k| (100 * y + 10 * x + k) as f32).collect()).collect())
            .collect()
    }

    #[test]
    fn test_expands_every_pair_into_a_sample() {
        let dir = tempfile::tempdir().unwrap();
        let rec = |_| (image(4, 4, 3), bundle(2, 5, 0), bundle(3, 5, 10), bundle(3, 5, 20));
        write_pickle(dir.path(), InputType::Pixels, (0..4).map(rec).collect(), vec![rec(0)]);

        let data = SortOfClevrLoader::new(dir.path(), InputType::Pixels).load().unwrap();
        assert_eq!(data.train.ternary.len(), 8);
        assert_eq!(data.train.binary.len(), 12);
        assert_eq!(data.train.unary.len(), 12);
        assert_eq!(data.test.sample_count(), 8);
        assert_eq!(data.train.binary[1].answer, 11);
        assert_eq!(data.train.unary[2].question, vec![2.0; 5]);
        assert_eq!(data.question_len(), Some(5));
    }

    #[test]
    fn test_samples_of_one_record_share_the_input() {
        let dir = tempfile::tempdir().unwrap();
        let rec = (image(2, 2, 3), bundle(1, 2, 0), bundle(2, 2, 0), bundle(2, 2, 0));
        write_pickle(dir.path(), InputType::Pixels, vec![rec], vec![]);

        let data = SortOfClevrLoader::new(dir.path(), InputType::Pixels).load().unwrap();
        assert!(Arc::ptr_eq(&data.train.ternary[0].input, &data.train.unary[1].input));
    }

    #[test]
    fn test_pixel_inputs_have_axes_swapped() {
        let dir = tempfile::tempdir().unwrap();
        let rec = (image(2, 3, 3), bundle(1, 2, 0), bundle(1, 2, 0), bundle(1, 2, 0));
        write_pickle(dir.path(), InputType::Pixels, vec![rec], vec![]);

        let data  = SortOfClevrLoader::new(dir.path(), InputType::Pixels).load().unwrap();
        let input = &data.train.binary[0].input;
        assert_eq!(input.shape, vec![3, 3, 2]);
        // out[c=2][w=1][h=1] == in[h=1][w=1][c=2] == 112
        assert_eq!(input.values[2 * 6 + 1 * 2 + 1], 112.0);
    }

    #[test]
    fn test_descriptor_inputs_are_kept_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let table = vec![vec![1.0f32, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let rec = (table, bundle(1, 2, 0), bundle(1, 2, 0), bundle(1, 2, 0));
        write_pickle(dir.path(), InputType::Descriptors, vec![rec], vec![]);

        let data = SortOfClevrLoader::new(dir.path(), InputType::Descriptors).load().unwrap();
        assert_eq!(data.input_shape(), Some(&[2usize, 3][..]));
        assert_eq!(data.train.ternary[0].input.values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_missing_file_is_a_data_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SortOfClevrLoader::new(dir.path(), InputType::Pixels).load().unwrap_err();
        assert!(matches!(err, TrainError::DataFormat { .. }));
    }

    #[test]
    fn test_mismatched_bundle_lengths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let broken: Bundle = (vec![vec![0.0; 2]; 3], vec![1, 2]);
        let rec = (image(2, 2, 3), bundle(1, 2, 0), broken, bundle(1, 2, 0));
        write_pickle(dir.path(), InputType::Pixels, vec![rec], vec![]);

        let err = SortOfClevrLoader::new(dir.path(), InputType::Pixels).load().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("3 questions but 2 answers"), "{msg}");
        assert!(msg.contains("train record 0"), "{msg}");
    }

    #[test]
    fn test_inconsistent_input_shapes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = (image(2, 2, 3), bundle(1, 2, 0), bundle(1, 2, 0), bundle(1, 2, 0));
        let b = (image(3, 3, 3), bundle(1, 2, 0), bundle(1, 2, 0), bundle(1, 2, 0));
        write_pickle(dir.path(), InputType::Pixels, vec![a], vec![b]);

        let err = SortOfClevrLoader::new(dir.path(), InputType::Pixels).load().unwrap_err();
        assert!(err.to_string().contains("test record 0"));
    }

    #[test]
    fn test_wrong_rank_for_input_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rec = (image(2, 2, 3), bundle(1, 2, 0), bundle(1, 2, 0), bundle(1, 2, 0));
        write_pickle(dir.path(), InputType::Descriptors, vec![rec], vec![]);

        let err = SortOfClevrLoader::new(dir.path(), InputType::Descriptors).load().unwrap_err();
        assert!(err.to_string().contains("rank-2"));
    }

    /// Nested list of floats, memoized the way CPython writes lists.
    fn emit_table(e: &mut Emitter, rows: &[Vec<f64>]) {
        e.empty_list();
        e.memoize();
        e.mark();
        for row in rows {
            e.empty_list();
            e.memoize();
            e.mark();
            for &v in row {
                e.float(v);
            }
            e.appends();
        }
        e.appends();
    }

    /// `(questions, answers)` tuple left on the stack; returns its memo id.
    fn emit_bundle(e: &mut Emitter, n: usize, q_len: usize, first_answer: i32) -> u32 {
        e.mark();
        let questions: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64; q_len]).collect();
        emit_table(e, &questions);
        e.empty_list();
        e.memoize();
        e.mark();
        for i in 0..n as i32 {
            e.int(first_answer + i);
        }
        e.appends();
        e.tuple();
        e.memoize()
    }

    fn write_bytes(dir: &Path, input_type: InputType, bytes: &[u8]) {
        std::fs::write(dir.join(input_type.dataset_file_name()), bytes).unwrap();
    }

    #[test]
    fn test_bundles_shared_through_the_memo_are_read_each_time() {
        let dir = tempfile::tempdir().unwrap();
        let table = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];

        // one bundle object referenced by all three categories of both records
        let mut e = Emitter::new();
        e.mark();
        e.empty_list();
        e.memoize();
        e.mark();
        e.mark();
        emit_table(&mut e, &table);
        let shared = emit_bundle(&mut e, 3, 4, 5);
        e.get(shared).get(shared).tuple();
        e.mark();
        emit_table(&mut e, &table);
        e.get(shared).get(shared).get(shared).tuple();
        e.appends();
        e.empty_list();
        e.tuple();
        write_bytes(dir.path(), InputType::Descriptors, &e.finish());

        let data = SortOfClevrLoader::new(dir.path(), InputType::Descriptors).load().unwrap();
        assert_eq!(data.train.ternary.len(), 6);
        assert_eq!(data.train.binary.len(), 6);
        assert_eq!(data.train.unary.len(), 6);
        assert_eq!(data.test.sample_count(), 0);
        assert_eq!(data.train.unary[5].answer, 7);
        assert_eq!(data.train.unary[5].question, vec![2.0; 4]);
        assert_eq!(data.train.binary[4].input.values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_numpy_images_questions_and_answers_are_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let pixels: Vec<f64> = image(2, 3, 3).into_iter().flatten().flatten().map(f64::from).collect();

        let mut e = Emitter::new();
        let mut f8 = None;
        let mut i8 = None;
        e.mark();
        e.empty_list();
        e.memoize();
        e.mark();
        for _ in 0..2 {
            e.mark();
            emit_f8_array(&mut e, &[2, 3, 3], &pixels, &mut f8);
            for category in 0..3 {
                // ([q0, q1], [np.int64(a0), np.int64(a1)])
                e.mark();
                e.empty_list().mark();
                emit_f8_array(&mut e, &[4], &[0.5; 4], &mut f8);
                emit_f8_array(&mut e, &[4], &[1.5; 4], &mut f8);
                e.appends();
                e.empty_list().mark();
                emit_i8_scalar(&mut e, category, &mut i8);
                emit_i8_scalar(&mut e, category + 3, &mut i8);
                e.appends();
                e.tuple();
            }
            e.tuple();
        }
        e.appends();
        e.empty_list();
        e.tuple();
        write_bytes(dir.path(), InputType::Pixels, &e.finish());

        let data = SortOfClevrLoader::new(dir.path(), InputType::Pixels).load().unwrap();
        assert_eq!(data.train.sample_count(), 12);
        assert_eq!(data.input_shape(), Some(&[3usize, 3, 2][..]));
        assert_eq!(data.train.binary[0].input.values[2 * 6 + 1 * 2 + 1], 112.0);
        assert_eq!(data.train.ternary[1].question, vec![1.5; 4]);
        assert_eq!(data.train.binary[1].answer, 4);
        assert_eq!(data.train.unary[0].answer, 2);
    }

    #[test]
    fn test_truncated_pickle_is_a_data_format_error() {
        let dir = tempfile::tempdir().unwrap();
        write_bytes(dir.path(), InputType::Pixels, b"\x80\x04(]");

        let err = SortOfClevrLoader::new(dir.path(), InputType::Pixels).load().unwrap_err();
        assert!(matches!(err, TrainError::DataFormat { .. }));
        assert!(err.to_string().contains("cannot unpickle"), "{err}");
    }

    #[test]
    fn test_read_array_rejects_ragged_lists() {
        // [[1.0, 2.0], [3.0]]
        let mut e = Emitter::new();
        e.empty_list().mark();
        e.empty_list().mark().float(1.0).float(2.0).appends();
        e.empty_list().mark().float(3.0).appends();
        e.appends();
        let tree = PickleTree::parse(&e.finish()).unwrap();
        assert!(read_array(&tree, tree.root()).is_err());

        // [1.0, [2.0]]
        let mut e = Emitter::new();
        e.empty_list().mark().float(1.0);
        e.empty_list().mark().float(2.0).appends();
        e.appends();
        let tree = PickleTree::parse(&e.finish()).unwrap();
        assert!(read_array(&tree, tree.root()).is_err());
    }

    #[test]
    fn test_labels_accept_ints_and_reject_negatives() {
        let mut e = Emitter::new();
        e.mark().int(7).float(2.0).int(-1).float(0.5).str("3").tuple();
        let tree  = PickleTree::parse(&e.finish()).unwrap();
        let items = tree.items(tree.root()).unwrap();

        assert_eq!(label(&tree, items[0]), Ok(7));
        assert_eq!(label(&tree, items[1]), Ok(2));
        assert!(label(&tree, items[2]).is_err());
        assert!(label(&tree, items[3]).is_err());
        assert!(label(&tree, items[4]).is_err());
    }
}
