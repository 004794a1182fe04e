// ============================================================
// Layer 4 — numpy objects in a pickle
// ============================================================
// Interprets the `Node::Call` entries numpy leaves in a pickle:
//
//   ndarray, protocol ≤ 4:
//     _reconstruct(ndarray, (0,), b'b')
//       BUILD (version, shape, dtype, is_fortran, raw bytes)
//
//   ndarray, protocol 5:
//     _frombuffer(buffer, dtype, shape, order)
//
//   scalar (np.int64, np.float32, ...):
//     scalar(dtype, raw bytes)
//
//   dtype:
//     dtype('f8', False, True)  BUILD (3, '<', ...)
//
// One dtype object is usually shared by every array of a file
// through the memo; the tree keeps it as a single node.

use crate::data::pickle::{Node, NodeId, PickleTree};
use crate::domain::sample::InputDatum;

/// Decode `id` as an ndarray. `Ok(None)` when it is not one.
pub fn ndarray(tree: &PickleTree, id: NodeId) -> Result<Option<InputDatum>, String> {
    let Node::Call { callable, args, state } = tree.node(id) else {
        return Ok(None);
    };

    match numpy_name(tree, *callable) {
        Some("_reconstruct") => {
            let state = state.ok_or("ndarray without BUILD state")?;
            let fields = tuple(tree, state, "ndarray state")?;
            // older pickles omit the leading version number
            let fields = match fields.len() {
                5 => &fields[1..],
                4 => fields,
                n => return Err(format!("ndarray state has {n} fields, expected 5")),
            };
            let shape   = read_shape(tree, fields[0])?;
            let dtype   = Dtype::read(tree, fields[1])?;
            let fortran = truthy(tree, fields[2])?;
            decode(tree, fields[3], shape, &dtype, fortran).map(Some)
        }
        Some("_frombuffer") => {
            let fields = tuple(tree, *args, "_frombuffer arguments")?;
            let &[buffer, dtype, shape, order] = fields else {
                return Err(format!("_frombuffer takes 4 arguments, found {}", fields.len()));
            };
            let dtype   = Dtype::read(tree, dtype)?;
            let shape   = read_shape(tree, shape)?;
            let fortran = tree.str(order) == Some("F");
            decode(tree, buffer, shape, &dtype, fortran).map(Some)
        }
        _ => Ok(None),
    }
}

/// Decode `id` as a numpy scalar. `Ok(None)` when it is not one.
pub fn scalar(tree: &PickleTree, id: NodeId) -> Result<Option<f64>, String> {
    let Node::Call { callable, args, .. } = tree.node(id) else {
        return Ok(None);
    };
    if numpy_name(tree, *callable) != Some("scalar") {
        return Ok(None);
    }

    let fields = tuple(tree, *args, "numpy scalar arguments")?;
    let &[dtype, raw] = fields else {
        return Err(format!("numpy scalar takes 2 arguments, found {}", fields.len()));
    };
    let dtype = Dtype::read(tree, dtype)?;
    match tree.bytes(raw) {
        Some(raw) if raw.len() == dtype.size => Ok(Some(dtype.element(&raw))),
        _ => Err(format!("numpy scalar data does not hold one {}", dtype.code)),
    }
}

fn numpy_name(tree: &PickleTree, callable: NodeId) -> Option<&str> {
    let (module, name) = tree.global(callable)?;
    (module == "numpy" || module.starts_with("numpy.")).then_some(name)
}

fn tuple<'t>(tree: &'t PickleTree, id: NodeId, what: &str) -> Result<&'t [NodeId], String> {
    tree.items(id)
        .ok_or_else(|| format!("{what}: expected a tuple, found {}", tree.kind(id)))
}

fn read_shape(tree: &PickleTree, id: NodeId) -> Result<Vec<usize>, String> {
    tuple(tree, id, "ndarray shape")?
        .iter()
        .map(|&axis| match tree.node(axis) {
            Node::Int(n) => usize::try_from(*n).map_err(|_| format!("negative axis length {n}")),
            _ => Err(format!("axis length must be an int, found {}", tree.kind(axis))),
        })
        .collect()
}

fn truthy(tree: &PickleTree, id: NodeId) -> Result<bool, String> {
    match tree.node(id) {
        Node::Bool(b) => Ok(*b),
        Node::Int(n)  => Ok(*n != 0),
        _ => Err(format!("expected a bool, found {}", tree.kind(id))),
    }
}

fn decode(
    tree:    &PickleTree,
    data:    NodeId,
    shape:   Vec<usize>,
    dtype:   &Dtype,
    fortran: bool,
) -> Result<InputDatum, String> {
    let raw = tree
        .bytes(data)
        .ok_or_else(|| format!("array data must be bytes, found {}", tree.kind(data)))?;

    let count: usize = shape.iter().product();
    if raw.len() != count * dtype.size {
        return Err(format!(
            "array data has {} bytes, expected {} for shape {shape:?} of {}",
            raw.len(),
            count * dtype.size,
            dtype.code
        ));
    }

    let values: Vec<f32> = raw.chunks_exact(dtype.size).map(|b| dtype.element(b) as f32).collect();
    let values = if fortran { to_row_major(&shape, &values) } else { values };
    InputDatum::new(shape, values).ok_or_else(|| "array data does not match its shape".to_string())
}

/// Reorder column-major values into row-major order.
fn to_row_major(shape: &[usize], column_major: &[f32]) -> Vec<f32> {
    let rank = shape.len();
    let mut strides = vec![1usize; rank];
    for axis in 1..rank {
        strides[axis] = strides[axis - 1] * shape[axis - 1];
    }

    let mut out   = Vec::with_capacity(column_major.len());
    let mut index = vec![0usize; rank];
    for _ in 0..column_major.len() {
        let offset: usize = index.iter().zip(&strides).map(|(i, s)| i * s).sum();
        out.push(column_major[offset]);

        for axis in (0..rank).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

// ─── dtype ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
struct Dtype {
    code:   String,
    kind:   char,
    size:   usize,
    little: bool,
}

impl Dtype {
    fn read(tree: &PickleTree, id: NodeId) -> Result<Self, String> {
        let Node::Call { callable, args, state } = tree.node(id) else {
            return Err(format!("expected a numpy dtype, found {}", tree.kind(id)));
        };
        if numpy_name(tree, *callable) != Some("dtype") {
            return Err("expected a numpy dtype, found another object".to_string());
        }

        let code = tuple(tree, *args, "dtype arguments")?
            .first()
            .and_then(|&c| tree.str(c))
            .ok_or("dtype without a type code")?;
        // BUILD state: (version, byte order, ...)
        let order = state
            .and_then(|s| tree.items(s))
            .and_then(|fields| fields.get(1))
            .and_then(|&o| tree.str(o));
        Self::parse(code, order)
    }

    fn parse(code: &str, order: Option<&str>) -> Result<Self, String> {
        let (order, rest) = match code.chars().next() {
            Some(c @ ('<' | '>' | '|' | '=')) => (Some(&code[..1]), &code[c.len_utf8()..]),
            _ => (order, code),
        };
        let mut chars = rest.chars();
        let kind = chars.next().ok_or("empty dtype code")?;
        let size: usize = chars
            .as_str()
            .parse()
            .map_err(|_| format!("unsupported dtype '{code}'"))?;

        match (kind, size) {
            ('f', 4 | 8) | ('i' | 'u', 1 | 2 | 4 | 8) | ('b', 1) => {}
            _ => return Err(format!("unsupported dtype '{code}'")),
        }

        let little = match order {
            Some(">") => false,
            Some("=") => cfg!(target_endian = "little"),
            _ => true,
        };
        Ok(Self { code: code.to_string(), kind, size, little })
    }

    /// One element from exactly `size` bytes.
    fn element(&self, raw: &[u8]) -> f64 {
        let mut le = [0u8; 8];
        le[..self.size].copy_from_slice(raw);
        if !self.little {
            le[..self.size].reverse();
        }

        match (self.kind, self.size) {
            ('f', 4) => f64::from(f32::from_le_bytes([le[0], le[1], le[2], le[3]])),
            ('f', _) => f64::from_le_bytes(le),
            ('i', n) => {
                let shift = 64 - 8 * n as u32;
                ((u64::from_le_bytes(le) << shift) as i64 >> shift) as f64
            }
            _ => u64::from_le_bytes(le) as f64,
        }
    }
}
