// ============================================================
// Layer 4 — Pickle Stack Machine
// ============================================================
// Runs the opcode stream of a pickle (protocols 0–5, in-band
// data only) and records every object it builds in an arena.
//
//   opcode stream ──► stack / mark stack / memo ──► PickleTree
//
// Memo GET pushes the id of the node stored by PUT/MEMOIZE, so
// an object written once and referenced many times is one node
// in the tree and can be visited any number of times. Calls
// (REDUCE, NEWOBJ) are not executed: they are kept as
// `Node::Call` with the state a later BUILD attaches, and are
// interpreted by the reader that knows what they mean (numpy.rs).

use std::{borrow::Cow, collections::HashMap};

use thiserror::Error;

// ─── Opcodes ──────────────────────────────────────────────────────────────────
const MARK: u8             = b'(';
const STOP: u8             = b'.';
const POP: u8              = b'0';
const POP_MARK: u8         = b'1';
const DUP: u8              = b'2';
const FLOAT: u8            = b'F';
const INT: u8              = b'I';
const BININT: u8           = b'J';
const BININT1: u8          = b'K';
const LONG: u8             = b'L';
const BININT2: u8          = b'M';
const NONE: u8             = b'N';
const BINSTRING: u8        = b'T';
const SHORT_BINSTRING: u8  = b'U';
const BINUNICODE: u8       = b'X';
const APPEND: u8           = b'a';
const BUILD: u8            = b'b';
const GLOBAL: u8           = b'c';
const DICT: u8             = b'd';
const EMPTY_DICT: u8       = b'}';
const APPENDS: u8          = b'e';
const GET: u8              = b'g';
const BINGET: u8           = b'h';
const LONG_BINGET: u8      = b'j';
const LIST: u8             = b'l';
const EMPTY_LIST: u8       = b']';
const PUT: u8              = b'p';
const BINPUT: u8           = b'q';
const LONG_BINPUT: u8      = b'r';
const SETITEM: u8          = b's';
const TUPLE: u8            = b't';
const EMPTY_TUPLE: u8      = b')';
const SETITEMS: u8         = b'u';
const BINFLOAT: u8         = b'G';
const REDUCE: u8           = b'R';
const BINBYTES: u8         = b'B';
const SHORT_BINBYTES: u8   = b'C';
const PROTO: u8            = 0x80;
const NEWOBJ: u8           = 0x81;
const TUPLE1: u8           = 0x85;
const TUPLE2: u8           = 0x86;
const TUPLE3: u8           = 0x87;
const NEWTRUE: u8          = 0x88;
const NEWFALSE: u8         = 0x89;
const LONG1: u8            = 0x8a;
const LONG4: u8            = 0x8b;
const SHORT_BINUNICODE: u8 = 0x8c;
const BINUNICODE8: u8      = 0x8d;
const BINBYTES8: u8        = 0x8e;
const EMPTY_SET: u8        = 0x8f;
const ADDITEMS: u8         = 0x90;
const FROZENSET: u8        = 0x91;
const NEWOBJ_EX: u8        = 0x92;
const STACK_GLOBAL: u8     = 0x93;
const MEMOIZE: u8          = 0x94;
const FRAME: u8            = 0x95;
const BYTEARRAY8: u8       = 0x96;

const HIGHEST_PROTOCOL: u8 = 5;

// ─── Errors ───────────────────────────────────────────────────────────────────
#[derive(Debug, Error, PartialEq)]
pub enum PickleError {
    #[error("pickle ends early at byte {0}")]
    Truncated(usize),

    #[error("unsupported pickle opcode 0x{op:02x} at byte {pos}")]
    UnsupportedOpcode { op: u8, pos: usize },

    #[error("malformed pickle at byte {pos}: {message}")]
    Malformed { pos: usize, message: String },
}

// ─── Tree ─────────────────────────────────────────────────────────────────────
pub type NodeId = usize;

/// One object built by the stream. Children are arena ids.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Lists and sets
    List(Vec<NodeId>),
    Tuple(Vec<NodeId>),
    Dict(Vec<(NodeId, NodeId)>),
    Global { module: String, name: String },
    /// `callable(*args)`, plus the state of a following BUILD
    Call { callable: NodeId, args: NodeId, state: Option<NodeId> },
}

#[derive(Debug, PartialEq)]
pub struct PickleTree {
    nodes: Vec<Node>,
    root:  NodeId,
}

impl PickleTree {
    pub fn parse(bytes: &[u8]) -> Result<Self, PickleError> {
        Machine::new(bytes).run()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Items of a list or tuple.
    pub fn items(&self, id: NodeId) -> Option<&[NodeId]> {
        match self.node(id) {
            Node::List(items) | Node::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn str(&self, id: NodeId) -> Option<&str> {
        match self.node(id) {
            Node::Str(s) => Some(s),
            _ => None,
        }
    }

    /// `(module, name)` of a global reference.
    pub fn global(&self, id: NodeId) -> Option<(&str, &str)> {
        match self.node(id) {
            Node::Global { module, name } => Some((module, name)),
            _ => None,
        }
    }

    /// Raw bytes, including the `_codecs.encode(str, 'latin1')` form
    /// protocol 2 uses for `bytes` objects.
    pub fn bytes(&self, id: NodeId) -> Option<Cow<'_, [u8]>> {
        match self.node(id) {
            Node::Bytes(raw) => Some(Cow::Borrowed(raw)),
            Node::Call { callable, args, .. } => {
                if self.global(*callable) != Some(("_codecs", "encode")) {
                    return None;
                }
                let args = self.items(*args)?;
                let text = self.str(*args.first()?)?;
                let raw = text.chars().map(|c| u8::try_from(c).ok()).collect::<Option<Vec<_>>>()?;
                Some(Cow::Owned(raw))
            }
            _ => None,
        }
    }

    /// Short type name for error messages.
    pub fn kind(&self, id: NodeId) -> &'static str {
        match self.node(id) {
            Node::None       => "None",
            Node::Bool(_)    => "bool",
            Node::Int(_)     => "int",
            Node::Float(_)   => "float",
            Node::Str(_)     => "str",
            Node::Bytes(_)   => "bytes",
            Node::List(_)    => "list",
            Node::Tuple(_)   => "tuple",
            Node::Dict(_)    => "dict",
            Node::Global{..} => "global",
            Node::Call{..}   => "object",
        }
    }
}

// ─── Machine ──────────────────────────────────────────────────────────────────
struct Machine<'a> {
    data:  &'a [u8],
    pos:   usize,
    /// Position of the opcode being executed
    at:    usize,
    nodes: Vec<Node>,
    stack: Vec<NodeId>,
    /// Stack lengths at each MARK
    marks: Vec<usize>,
    memo:  HashMap<u32, NodeId>,
}

impl<'a> Machine<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos:   0,
            at:    0,
            nodes: Vec::new(),
            stack: Vec::new(),
            marks: Vec::new(),
            memo:  HashMap::new(),
        }
    }

    fn run(mut self) -> Result<PickleTree, PickleError> {
        loop {
            self.at = self.pos;
            let op = self.byte()?;
            match op {
                PROTO => {
                    let version = self.byte()?;
                    if version > HIGHEST_PROTOCOL {
                        return Err(self.malformed(format!("unknown protocol {version}")));
                    }
                }
                FRAME => {
                    // frames are contiguous in the stream; the length is advisory
                    self.array::<8>()?;
                }
                STOP => {
                    let root = self.pop()?;
                    return Ok(PickleTree { nodes: self.nodes, root });
                }

                // stack manipulation
                MARK => self.marks.push(self.stack.len()),
                POP => {
                    if self.marks.last() == Some(&self.stack.len()) {
                        self.marks.pop();
                    } else {
                        self.pop()?;
                    }
                }
                POP_MARK => {
                    self.pop_mark()?;
                }
                DUP => {
                    let top = self.top()?;
                    self.stack.push(top);
                }

                // scalars
                NONE     => self.push(Node::None),
                NEWTRUE  => self.push(Node::Bool(true)),
                NEWFALSE => self.push(Node::Bool(false)),
                INT => {
                    let node = match self.line()? {
                        "01" => Node::Bool(true),
                        "00" => Node::Bool(false),
                        text => Node::Int(self.parse_text(text)?),
                    };
                    self.push(node);
                }
                LONG => {
                    let text = self.line()?;
                    let value = self.parse_text(text.trim_end_matches('L'))?;
                    self.push(Node::Int(value));
                }
                BININT => {
                    let value = i32::from_le_bytes(self.array()?);
                    self.push(Node::Int(i64::from(value)));
                }
                BININT1 => {
                    let value = self.byte()?;
                    self.push(Node::Int(i64::from(value)));
                }
                BININT2 => {
                    let value = u16::from_le_bytes(self.array()?);
                    self.push(Node::Int(i64::from(value)));
                }
                LONG1 => {
                    let len = usize::from(self.byte()?);
                    self.long(len)?;
                }
                LONG4 => {
                    let len = self.len32()?;
                    self.long(len)?;
                }
                FLOAT => {
                    let text = self.line()?;
                    let value = self.parse_text(text)?;
                    self.push(Node::Float(value));
                }
                BINFLOAT => {
                    let value = f64::from_be_bytes(self.array()?);
                    self.push(Node::Float(value));
                }

                // text and binary blobs
                SHORT_BINUNICODE => {
                    let len = usize::from(self.byte()?);
                    self.unicode(len)?;
                }
                BINUNICODE => {
                    let len = self.len32()?;
                    self.unicode(len)?;
                }
                BINUNICODE8 => {
                    let len = self.len64()?;
                    self.unicode(len)?;
                }
                SHORT_BINBYTES | SHORT_BINSTRING => {
                    let len = usize::from(self.byte()?);
                    self.blob(len)?;
                }
                BINBYTES | BINSTRING => {
                    let len = self.len32()?;
                    self.blob(len)?;
                }
                BINBYTES8 | BYTEARRAY8 => {
                    let len = self.len64()?;
                    self.blob(len)?;
                }

                // containers
                EMPTY_LIST | EMPTY_SET => self.push(Node::List(Vec::new())),
                EMPTY_TUPLE => self.push(Node::Tuple(Vec::new())),
                EMPTY_DICT  => self.push(Node::Dict(Vec::new())),
                LIST | FROZENSET => {
                    let items = self.pop_mark()?;
                    self.push(Node::List(items));
                }
                TUPLE => {
                    let items = self.pop_mark()?;
                    self.push(Node::Tuple(items));
                }
                TUPLE1 | TUPLE2 | TUPLE3 => {
                    let items = self.pop_n(usize::from(op - TUPLE1) + 1)?;
                    self.push(Node::Tuple(items));
                }
                DICT => {
                    let items = self.pop_mark()?;
                    let pairs = self.pairs(items)?;
                    self.push(Node::Dict(pairs));
                }
                APPEND => {
                    let item = self.pop()?;
                    self.extend_list(vec![item])?;
                }
                APPENDS | ADDITEMS => {
                    let items = self.pop_mark()?;
                    self.extend_list(items)?;
                }
                SETITEM => {
                    let items = self.pop_n(2)?;
                    let pairs = self.pairs(items)?;
                    self.extend_dict(pairs)?;
                }
                SETITEMS => {
                    let items = self.pop_mark()?;
                    let pairs = self.pairs(items)?;
                    self.extend_dict(pairs)?;
                }

                // objects
                GLOBAL => {
                    let module = self.line()?.to_string();
                    let name   = self.line()?.to_string();
                    self.push(Node::Global { module, name });
                }
                STACK_GLOBAL => {
                    let name   = self.pop()?;
                    let module = self.pop()?;
                    let (Node::Str(module), Node::Str(name)) = (&self.nodes[module], &self.nodes[name]) else {
                        return Err(self.malformed("STACK_GLOBAL needs two strings"));
                    };
                    let node = Node::Global { module: module.clone(), name: name.clone() };
                    self.push(node);
                }
                REDUCE | NEWOBJ => {
                    let args     = self.pop()?;
                    let callable = self.pop()?;
                    self.push(Node::Call { callable, args, state: None });
                }
                NEWOBJ_EX => {
                    let _kwargs  = self.pop()?;
                    let args     = self.pop()?;
                    let callable = self.pop()?;
                    self.push(Node::Call { callable, args, state: None });
                }
                BUILD => {
                    let new_state = self.pop()?;
                    let target    = self.top()?;
                    let Node::Call { state, .. } = &mut self.nodes[target] else {
                        return Err(self.malformed("BUILD on an object that was not constructed"));
                    };
                    *state = Some(new_state);
                }

                // memo
                PUT => {
                    let text = self.line()?;
                    let id = self.parse_text(text)?;
                    self.put(id)?;
                }
                BINPUT => {
                    let id = self.byte()?;
                    self.put(u32::from(id))?;
                }
                LONG_BINPUT => {
                    let id = u32::from_le_bytes(self.array()?);
                    self.put(id)?;
                }
                MEMOIZE => {
                    let id = u32::try_from(self.memo.len())
                        .map_err(|_| self.malformed("memo is full"))?;
                    self.put(id)?;
                }
                GET => {
                    let text = self.line()?;
                    let id = self.parse_text(text)?;
                    self.get(id)?;
                }
                BINGET => {
                    let id = self.byte()?;
                    self.get(u32::from(id))?;
                }
                LONG_BINGET => {
                    let id = u32::from_le_bytes(self.array()?);
                    self.get(id)?;
                }

                op => return Err(PickleError::UnsupportedOpcode { op, pos: self.at }),
            }
        }
    }

    // ── reading ──────────────────────────────────────────────────
    fn take(&mut self, n: usize) -> Result<&'a [u8], PickleError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(PickleError::Truncated(self.data.len()))?;
        let data = self.data;
        self.pos = end;
        Ok(&data[end - n..end])
    }

    fn byte(&mut self) -> Result<u8, PickleError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], PickleError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn len32(&mut self) -> Result<usize, PickleError> {
        let len = u32::from_le_bytes(self.array()?);
        usize::try_from(len).map_err(|_| self.malformed("length does not fit in memory"))
    }

    fn len64(&mut self) -> Result<usize, PickleError> {
        let len = u64::from_le_bytes(self.array()?);
        usize::try_from(len).map_err(|_| self.malformed("length does not fit in memory"))
    }

    /// Newline-terminated text argument, without the newline.
    fn line(&mut self) -> Result<&'a str, PickleError> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(PickleError::Truncated(self.data.len()))?;
        let raw = self.take(len + 1)?;
        std::str::from_utf8(&raw[..len]).map_err(|_| self.malformed("text argument is not UTF-8"))
    }

    fn parse_text<T: std::str::FromStr>(&self, text: &str) -> Result<T, PickleError> {
        text.trim()
            .parse()
            .map_err(|_| self.malformed(format!("cannot parse '{text}'")))
    }

    fn long(&mut self, len: usize) -> Result<(), PickleError> {
        let raw = self.take(len)?;
        if len > 8 {
            return Err(self.malformed(format!("{len}-byte integer does not fit in 64 bits")));
        }
        // little-endian two's complement, sign-extended to 8 bytes
        let fill = match raw.last() {
            Some(b) if b & 0x80 != 0 => 0xff,
            _ => 0x00,
        };
        let mut buf = [fill; 8];
        buf[..len].copy_from_slice(raw);
        self.push(Node::Int(i64::from_le_bytes(buf)));
        Ok(())
    }

    fn unicode(&mut self, len: usize) -> Result<(), PickleError> {
        let raw = self.take(len)?;
        let text = std::str::from_utf8(raw).map_err(|_| self.malformed("string is not UTF-8"))?;
        self.push(Node::Str(text.to_string()));
        Ok(())
    }

    fn blob(&mut self, len: usize) -> Result<(), PickleError> {
        let raw = self.take(len)?.to_vec();
        self.push(Node::Bytes(raw));
        Ok(())
    }

    // ── stack ────────────────────────────────────────────────────
    fn push(&mut self, node: Node) {
        self.nodes.push(node);
        self.stack.push(self.nodes.len() - 1);
    }

    fn pop(&mut self) -> Result<NodeId, PickleError> {
        if self.marks.last() == Some(&self.stack.len()) {
            return Err(self.malformed("pop across a MARK"));
        }
        self.stack.pop().ok_or_else(|| self.malformed("stack underflow"))
    }

    fn top(&self) -> Result<NodeId, PickleError> {
        self.stack.last().copied().ok_or_else(|| self.malformed("stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<NodeId>, PickleError> {
        let floor = self.marks.last().copied().unwrap_or(0);
        match self.stack.len().checked_sub(n) {
            Some(start) if start >= floor => Ok(self.stack.split_off(start)),
            _ => Err(self.malformed("stack underflow")),
        }
    }

    fn pop_mark(&mut self) -> Result<Vec<NodeId>, PickleError> {
        let start = self.marks.pop().ok_or_else(|| self.malformed("no MARK on the stack"))?;
        if start > self.stack.len() {
            return Err(self.malformed("MARK above the stack top"));
        }
        Ok(self.stack.split_off(start))
    }

    fn pairs(&self, items: Vec<NodeId>) -> Result<Vec<(NodeId, NodeId)>, PickleError> {
        if items.len() % 2 != 0 {
            return Err(self.malformed("odd number of dict items"));
        }
        Ok(items.chunks_exact(2).map(|kv| (kv[0], kv[1])).collect())
    }

    fn extend_list(&mut self, items: Vec<NodeId>) -> Result<(), PickleError> {
        let target = self.top()?;
        let Node::List(list) = &mut self.nodes[target] else {
            return Err(self.malformed("append to a non-list"));
        };
        list.extend(items);
        Ok(())
    }

    fn extend_dict(&mut self, pairs: Vec<(NodeId, NodeId)>) -> Result<(), PickleError> {
        let target = self.top()?;
        let Node::Dict(dict) = &mut self.nodes[target] else {
            return Err(self.malformed("set item on a non-dict"));
        };
        dict.extend(pairs);
        Ok(())
    }

    // ── memo ─────────────────────────────────────────────────────
    fn put(&mut self, id: u32) -> Result<(), PickleError> {
        let top = self.top()?;
        self.memo.insert(id, top);
        Ok(())
    }

    fn get(&mut self, id: u32) -> Result<(), PickleError> {
        let node = *self
            .memo
            .get(&id)
            .ok_or_else(|| self.malformed(format!("memo entry {id} was never stored")))?;
        self.stack.push(node);
        Ok(())
    }

    fn malformed(&self, message: impl Into<String>) -> PickleError {
        PickleError::Malformed { pos: self.at, message: message.into() }
    }
}
