/// Adaptive radix tree index.
///
/// Inner nodes branch on one key byte and come in four sizes that grow and
/// shrink with their fan-out:
///
/// ```text
/// Node4    up to 4 children    sorted byte array + child array
/// Node16   up to 16 children   sorted byte array + child array
/// Node48   up to 48 children   256-entry byte -> slot map + 48 slots
/// Node256  up to 256 children  direct 256-entry child array
/// ```
///
/// Runs of bytes shared by every key below a node are stored once as the
/// node's `prefix` (path compression). A key that ends exactly at an inner
/// node lives in that node's `terminal` leaf, so keys that are prefixes of
/// other keys are supported. Leaves keep the full key.
use parking_lot::RwLock;
use record::RecordPosition;
use std::fmt;
use std::mem;

use crate::{IndexCursor, IndexError, Indexer, SnapshotCursor};

const NODE4_MAX: usize = 4;
const NODE16_MAX: usize = 16;
const NODE48_MAX: usize = 48;

// shrink thresholds, below the next smaller capacity so a node does not
// flip back and forth on alternating insert/delete
const NODE16_MIN: usize = 3;
const NODE48_MIN: usize = 12;
const NODE256_MIN: usize = 37;

struct Leaf {
    key: Vec<u8>,
    pos: RecordPosition,
}

enum Node {
    Leaf(Leaf),
    Inner(Box<Inner>),
}

#[derive(Default)]
struct Inner {
    prefix: Vec<u8>,
    terminal: Option<Leaf>,
    children: Children,
}

enum Children {
    Node4(Sorted),
    Node16(Sorted),
    Node48(Indexed),
    Node256(Direct),
}

impl Default for Children {
    fn default() -> Self {
        Children::Node4(Sorted::default())
    }
}

// -------------------- Child containers --------------------

#[derive(Default)]
struct Sorted {
    bytes: Vec<u8>,
    nodes: Vec<Node>,
}

impl Sorted {
    fn from_entries(entries: Vec<(u8, Node)>) -> Self {
        let (bytes, nodes): (Vec<u8>, Vec<Node>) = entries.into_iter().unzip();
        Self { bytes, nodes }
    }

    fn find(&self, byte: u8) -> Option<&Node> {
        self.bytes.binary_search(&byte).ok().map(|i| &self.nodes[i])
    }

    fn find_mut(&mut self, byte: u8) -> Option<&mut Node> {
        match self.bytes.binary_search(&byte) {
            Ok(i) => Some(&mut self.nodes[i]),
            Err(_) => None,
        }
    }

    fn insert(&mut self, byte: u8, node: Node) {
        match self.bytes.binary_search(&byte) {
            Ok(i) => self.nodes[i] = node,
            Err(i) => {
                self.bytes.insert(i, byte);
                self.nodes.insert(i, node);
            }
        }
    }

    fn remove(&mut self, byte: u8) -> Option<Node> {
        let i = self.bytes.binary_search(&byte).ok()?;
        self.bytes.remove(i);
        Some(self.nodes.remove(i))
    }

    fn into_entries(self) -> Vec<(u8, Node)> {
        self.bytes.into_iter().zip(self.nodes).collect()
    }
}

struct Indexed {
    /// `0` means no child, otherwise slot index + 1.
    slot_of: [u8; 256],
    slots: Vec<Option<Node>>,
    len: usize,
}

impl Indexed {
    fn new() -> Self {
        Self {
            slot_of: [0; 256],
            slots: (0..NODE48_MAX).map(|_| None).collect(),
            len: 0,
        }
    }

    fn from_entries(entries: Vec<(u8, Node)>) -> Self {
        let mut indexed = Self::new();
        for (byte, node) in entries {
            indexed.insert(byte, node);
        }
        indexed
    }

    fn find(&self, byte: u8) -> Option<&Node> {
        match self.slot_of[byte as usize] {
            0 => None,
            s => self.slots[s as usize - 1].as_ref(),
        }
    }

    fn find_mut(&mut self, byte: u8) -> Option<&mut Node> {
        match self.slot_of[byte as usize] {
            0 => None,
            s => self.slots[s as usize - 1].as_mut(),
        }
    }

    fn insert(&mut self, byte: u8, node: Node) {
        let existing = self.slot_of[byte as usize];
        if existing != 0 {
            self.slots[existing as usize - 1] = Some(node);
            return;
        }
        if let Some(free) = self.slots.iter().position(Option::is_none) {
            self.slots[free] = Some(node);
            self.slot_of[byte as usize] = (free + 1) as u8;
            self.len += 1;
        }
    }

    fn remove(&mut self, byte: u8) -> Option<Node> {
        let s = self.slot_of[byte as usize];
        if s == 0 {
            return None;
        }
        self.slot_of[byte as usize] = 0;
        self.len -= 1;
        self.slots[s as usize - 1].take()
    }

    fn into_entries(mut self) -> Vec<(u8, Node)> {
        let mut out = Vec::with_capacity(self.len);
        for byte in 0..=u8::MAX {
            let s = self.slot_of[byte as usize];
            if s != 0 {
                if let Some(node) = self.slots[s as usize - 1].take() {
                    out.push((byte, node));
                }
            }
        }
        out
    }
}

struct Direct {
    nodes: Vec<Option<Node>>,
    len: usize,
}

impl Direct {
    fn from_entries(entries: Vec<(u8, Node)>) -> Self {
        let mut direct = Self {
            nodes: (0..256).map(|_| None).collect(),
            len: 0,
        };
        for (byte, node) in entries {
            direct.insert(byte, node);
        }
        direct
    }

    fn insert(&mut self, byte: u8, node: Node) {
        if self.nodes[byte as usize].replace(node).is_none() {
            self.len += 1;
        }
    }

    fn remove(&mut self, byte: u8) -> Option<Node> {
        let node = self.nodes[byte as usize].take();
        if node.is_some() {
            self.len -= 1;
        }
        node
    }

    fn into_entries(self) -> Vec<(u8, Node)> {
        self.nodes
            .into_iter()
            .enumerate()
            .filter_map(|(byte, node)| node.map(|n| (byte as u8, n)))
            .collect()
    }
}

impl Children {
    fn len(&self) -> usize {
        match self {
            Children::Node4(s) | Children::Node16(s) => s.bytes.len(),
            Children::Node48(i) => i.len,
            Children::Node256(d) => d.len,
        }
    }

    fn is_full(&self) -> bool {
        match self {
            Children::Node4(s) => s.bytes.len() >= NODE4_MAX,
            Children::Node16(s) => s.bytes.len() >= NODE16_MAX,
            Children::Node48(i) => i.len >= NODE48_MAX,
            Children::Node256(_) => false,
        }
    }

    fn find(&self, byte: u8) -> Option<&Node> {
        match self {
            Children::Node4(s) | Children::Node16(s) => s.find(byte),
            Children::Node48(i) => i.find(byte),
            Children::Node256(d) => d.nodes[byte as usize].as_ref(),
        }
    }

    fn find_mut(&mut self, byte: u8) -> Option<&mut Node> {
        match self {
            Children::Node4(s) | Children::Node16(s) => s.find_mut(byte),
            Children::Node48(i) => i.find_mut(byte),
            Children::Node256(d) => d.nodes[byte as usize].as_mut(),
        }
    }

    /// Adds a child for a byte that has none, growing the node when full.
    fn insert(&mut self, byte: u8, node: Node) {
        if self.is_full() {
            self.grow();
        }
        match self {
            Children::Node4(s) | Children::Node16(s) => s.insert(byte, node),
            Children::Node48(i) => i.insert(byte, node),
            Children::Node256(d) => d.insert(byte, node),
        }
    }

    /// Removes the child for `byte`, shrinking the node when it gets sparse.
    fn remove(&mut self, byte: u8) -> Option<Node> {
        let removed = match self {
            Children::Node4(s) | Children::Node16(s) => s.remove(byte),
            Children::Node48(i) => i.remove(byte),
            Children::Node256(d) => d.remove(byte),
        };
        if removed.is_some() {
            self.shrink();
        }
        removed
    }

    fn grow(&mut self) {
        *self = match mem::take(self) {
            Children::Node4(s) => Children::Node16(s),
            Children::Node16(s) => Children::Node48(Indexed::from_entries(s.into_entries())),
            Children::Node48(i) => Children::Node256(Direct::from_entries(i.into_entries())),
            full => full,
        };
    }

    fn shrink(&mut self) {
        let len = self.len();
        let sparse = match self {
            Children::Node4(_) => false,
            Children::Node16(_) => len <= NODE16_MIN,
            Children::Node48(_) => len <= NODE48_MIN,
            Children::Node256(_) => len <= NODE256_MIN,
        };
        if !sparse {
            return;
        }
        *self = match mem::take(self) {
            Children::Node16(s) => Children::Node4(s),
            Children::Node48(i) => Children::Node16(Sorted::from_entries(i.into_entries())),
            Children::Node256(d) => Children::Node48(Indexed::from_entries(d.into_entries())),
            small => small,
        };
    }

    fn into_entries(self) -> Vec<(u8, Node)> {
        match self {
            Children::Node4(s) | Children::Node16(s) => s.into_entries(),
            Children::Node48(i) => i.into_entries(),
            Children::Node256(d) => d.into_entries(),
        }
    }

    /// Calls `f` for every child in ascending byte order.
    fn for_each(&self, mut f: impl FnMut(&Node)) {
        match self {
            Children::Node4(s) | Children::Node16(s) => s.nodes.iter().for_each(f),
            Children::Node48(i) => {
                for byte in 0..=u8::MAX {
                    if let Some(node) = i.find(byte) {
                        f(node);
                    }
                }
            }
            Children::Node256(d) => d.nodes.iter().flatten().for_each(f),
        }
    }
}

// -------------------- Tree algorithms --------------------

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

impl Inner {
    fn with_prefix(prefix: Vec<u8>) -> Self {
        Self {
            prefix,
            ..Self::default()
        }
    }

    /// Places `leaf` below this node; `depth` is the key offset just past
    /// this node's prefix.
    fn add_leaf(&mut self, leaf: Leaf, depth: usize) {
        if leaf.key.len() == depth {
            self.terminal = Some(leaf);
        } else {
            let byte = leaf.key[depth];
            self.children.insert(byte, Node::Leaf(leaf));
        }
    }

    /// Splits the prefix at `at`: everything currently below this node moves
    /// into a new child keyed by `prefix[at]`.
    fn split_prefix(&mut self, at: usize) {
        let byte = self.prefix[at];
        let lower = Inner {
            prefix: self.prefix[at + 1..].to_vec(),
            terminal: self.terminal.take(),
            children: mem::take(&mut self.children),
        };
        self.prefix.truncate(at);
        self.children.insert(byte, Node::Inner(Box::new(lower)));
    }
}

fn insert(node: &mut Node, key: Vec<u8>, depth: usize, pos: RecordPosition) -> Option<RecordPosition> {
    if let Node::Leaf(leaf) = node {
        if leaf.key == key {
            return Some(mem::replace(&mut leaf.pos, pos));
        }
        let split = depth + common_prefix_len(&leaf.key[depth..], &key[depth..]);
        let mut inner = Inner::with_prefix(key[depth..split].to_vec());
        inner.add_leaf(Leaf { key, pos }, split);
        let old = mem::replace(node, Node::Inner(Box::new(inner)));
        if let (Node::Inner(inner), Node::Leaf(old)) = (node, old) {
            inner.add_leaf(old, split);
        }
        return None;
    }

    let Node::Inner(inner) = node else {
        return None;
    };

    let matched = common_prefix_len(&inner.prefix, &key[depth..]);
    if matched < inner.prefix.len() {
        inner.split_prefix(matched);
        inner.add_leaf(Leaf { key, pos }, depth + matched);
        return None;
    }

    let depth = depth + matched;
    if depth == key.len() {
        return match &mut inner.terminal {
            Some(leaf) => Some(mem::replace(&mut leaf.pos, pos)),
            None => {
                inner.terminal = Some(Leaf { key, pos });
                None
            }
        };
    }

    let byte = key[depth];
    match inner.children.find_mut(byte) {
        Some(child) => insert(child, key, depth + 1, pos),
        None => {
            inner.children.insert(byte, Node::Leaf(Leaf { key, pos }));
            None
        }
    }
}

/// Removes `key` from below the inner node `node`, collapsing nodes left
/// with a single entry.
fn remove(node: &mut Node, key: &[u8], depth: usize) -> Option<RecordPosition> {
    let Node::Inner(inner) = node else {
        return None;
    };
    if !key[depth..].starts_with(&inner.prefix) {
        return None;
    }
    let depth = depth + inner.prefix.len();

    let removed = if depth == key.len() {
        inner.terminal.take().map(|leaf| leaf.pos)
    } else {
        let byte = key[depth];
        let child = inner.children.find_mut(byte)?;
        if let Node::Inner(_) = child {
            return remove(child, key, depth + 1);
        }
        if !matches!(child, Node::Leaf(leaf) if leaf.key == key) {
            return None;
        }
        match inner.children.remove(byte) {
            Some(Node::Leaf(leaf)) => Some(leaf.pos),
            _ => None,
        }
    };

    if removed.is_some() {
        collapse(node);
    }
    removed
}

/// Replaces an inner node that holds a single entry with that entry.
fn collapse(node: &mut Node) {
    let Node::Inner(inner) = node else {
        return;
    };
    let replacement = match (inner.terminal.is_some(), inner.children.len()) {
        (true, 0) => match inner.terminal.take() {
            Some(leaf) => Node::Leaf(leaf),
            None => return,
        },
        (false, 1) => {
            let Some((byte, child)) = mem::take(&mut inner.children).into_entries().pop() else {
                return;
            };
            match child {
                Node::Leaf(leaf) => Node::Leaf(leaf),
                Node::Inner(mut lower) => {
                    let mut prefix = mem::take(&mut inner.prefix);
                    prefix.push(byte);
                    prefix.extend_from_slice(&lower.prefix);
                    lower.prefix = prefix;
                    Node::Inner(lower)
                }
            }
        }
        _ => return,
    };
    *node = replacement;
}

fn collect(node: &Node, out: &mut Vec<(Vec<u8>, RecordPosition)>) {
    match node {
        Node::Leaf(leaf) => out.push((leaf.key.clone(), leaf.pos)),
        Node::Inner(inner) => {
            // a terminal key is a prefix of everything below it
            if let Some(leaf) = &inner.terminal {
                out.push((leaf.key.clone(), leaf.pos));
            }
            inner.children.for_each(|child| collect(child, out));
        }
    }
}

#[derive(Default)]
struct Tree {
    root: Option<Node>,
    len: usize,
}

impl Tree {
    fn get(&self, key: &[u8]) -> Option<RecordPosition> {
        let mut node = self.root.as_ref()?;
        let mut depth = 0;
        loop {
            match node {
                Node::Leaf(leaf) => return (leaf.key == key).then_some(leaf.pos),
                Node::Inner(inner) => {
                    if !key[depth..].starts_with(&inner.prefix) {
                        return None;
                    }
                    depth += inner.prefix.len();
                    if depth == key.len() {
                        return inner.terminal.as_ref().map(|leaf| leaf.pos);
                    }
                    node = inner.children.find(key[depth])?;
                    depth += 1;
                }
            }
        }
    }

    fn insert(&mut self, key: Vec<u8>, pos: RecordPosition) -> Option<RecordPosition> {
        let old = match self.root.as_mut() {
            Some(root) => insert(root, key, 0, pos),
            None => {
                self.root = Some(Node::Leaf(Leaf { key, pos }));
                None
            }
        };
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    fn remove(&mut self, key: &[u8]) -> Option<RecordPosition> {
        let removed = match self.root.as_mut()? {
            Node::Leaf(leaf) => {
                if leaf.key != key {
                    return None;
                }
                let pos = leaf.pos;
                self.root = None;
                Some(pos)
            }
            root => remove(root, key, 0),
        };
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn entries(&self) -> Vec<(Vec<u8>, RecordPosition)> {
        let mut out = Vec::with_capacity(self.len);
        if let Some(root) = &self.root {
            collect(root, &mut out);
        }
        out
    }
}

/// Index backed by an adaptive radix tree.
#[derive(Default)]
pub struct ArtIndex {
    tree: RwLock<Tree>,
}

impl fmt::Debug for ArtIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtIndex")
            .field("len", &self.tree.read().len)
            .finish()
    }
}

impl ArtIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kind of the root node, for checking growth and shrinking.
    #[cfg(test)]
    pub(crate) fn root_kind(&self) -> &'static str {
        match &self.tree.read().root {
            None => "empty",
            Some(Node::Leaf(_)) => "leaf",
            Some(Node::Inner(inner)) => match inner.children {
                Children::Node4(_) => "node4",
                Children::Node16(_) => "node16",
                Children::Node48(_) => "node48",
                Children::Node256(_) => "node256",
            },
        }
    }
}

impl Indexer for ArtIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Result<Option<RecordPosition>, IndexError> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<RecordPosition>, IndexError> {
        Ok(self.tree.read().get(key))
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<RecordPosition>, bool), IndexError> {
        let old = self.tree.write().remove(key);
        let found = old.is_some();
        Ok((old, found))
    }

    fn size(&self) -> Result<usize, IndexError> {
        Ok(self.tree.read().len)
    }

    fn cursor(&self, reverse: bool) -> Result<Box<dyn IndexCursor>, IndexError> {
        let items = self.tree.read().entries();
        Ok(Box::new(SnapshotCursor::new(items, reverse)))
    }

    fn close(&self) -> Result<(), IndexError> {
        Ok(())
    }
}
