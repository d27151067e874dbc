//! Arena-backed XML element tree.
//!
//! Nodes live in one `Vec` and are addressed by [`NodeId`]. A node's children are an ordered
//! list of ids, so reordering is a permutation of indices and moving a subtree never copies it.
//! Detached nodes stay in the arena until the tree is dropped.

use crate::docx::vocab::{self, Ns};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    /// Qualified name as written (`w:rPr`).
    pub name: String,
    /// Attributes in document order, values unescaped.
    pub attrs: Vec<(String, String)>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(p, _)| p)
    }

    pub fn local_name(&self) -> &str {
        self.name.split_once(':').map(|(_, l)| l).unwrap_or(&self.name)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        for (k, v) in self.attrs.iter_mut() {
            if k == key {
                *v = value;
                return;
            }
        }
        self.attrs.push((key.to_string(), value));
    }

    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let pos = self.attrs.iter().position(|(k, _)| k == key)?;
        Some(self.attrs.remove(pos).1)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeData {
    /// The synthetic document node owning the root element and any prolog/epilog nodes.
    Document,
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    Pi(String),
    DocType(String),
}

#[derive(Clone, Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlDecl {
    pub version: String,
    pub standalone: Option<String>,
}

impl Default for XmlDecl {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            standalone: Some("yes".to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct XmlTree {
    nodes: Vec<Node>,
    pub decl: Option<XmlDecl>,
}

const DOCUMENT: NodeId = NodeId(0);

impl Default for XmlTree {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlTree {
    /// An empty tree holding only the document node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
            decl: Some(XmlDecl::default()),
        }
    }

    /// A tree whose root element is `ns:local`, with the given namespaces declared on it.
    pub fn with_root(ns: Ns, local: &str, declare: &[Ns]) -> Self {
        let mut tree = Self::new();
        let mut el = Element::new(format!("{}:{}", ns.prefix, local));
        if !declare.iter().any(|d| d.prefix == ns.prefix) {
            el.attrs.push((format!("xmlns:{}", ns.prefix), ns.uri.to_string()));
        }
        for d in declare {
            el.attrs.push((format!("xmlns:{}", d.prefix), d.uri.to_string()));
        }
        let root = tree.push(NodeData::Element(el));
        tree.append_child(DOCUMENT, root);
        tree
    }

    /// A tree whose root element lives in a default (unprefixed) namespace.
    pub fn with_default_ns_root(local: &str, uri: &str) -> Self {
        let mut tree = Self::new();
        let mut el = Element::new(local);
        el.attrs.push(("xmlns".to_string(), uri.to_string()));
        let root = tree.push(NodeData::Element(el));
        tree.append_child(DOCUMENT, root);
        tree
    }

    pub fn document(&self) -> NodeId {
        DOCUMENT
    }

    /// The root element, if the document has one.
    pub fn root(&self) -> Option<NodeId> {
        self.nodes[DOCUMENT.0]
            .children
            .iter()
            .copied()
            .find(|id| self.element(*id).is_some())
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn create_element(&mut self, name: impl Into<String>) -> NodeId {
        self.push(NodeData::Element(Element::new(name)))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeData::Text(text.into()))
    }

    pub fn create_node(&mut self, data: NodeData) -> NodeId {
        self.push(data)
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0].data
    }

    pub fn data_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.0].data
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].data {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].data {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.name.as_str())
    }

    pub fn local_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.local_name())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn child_elements(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.element(*c).is_some())
            .collect()
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|c| *c == id)
    }

    /// True when `ancestor` is a strict ancestor of `id`.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.parent(p);
        }
        false
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |p| self.parent(*p))
    }

    // ---------------------------------------------------------------------------------------
    // Namespaces
    // ---------------------------------------------------------------------------------------

    /// Resolve `prefix` (None = default namespace) in the scope of `id`.
    pub fn lookup_namespace(&self, id: NodeId, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(vocab::XML.uri);
        }
        let key = match prefix {
            Some(p) => format!("xmlns:{p}"),
            None => "xmlns".to_string(),
        };
        let mut cur = Some(id);
        while let Some(n) = cur {
            if let Some(el) = self.element(n) {
                if let Some(uri) = el.attr(&key) {
                    return Some(uri);
                }
            }
            cur = self.parent(n);
        }
        prefix.and_then(vocab::well_known_uri)
    }

    pub fn namespace(&self, id: NodeId) -> Option<&str> {
        let el = self.element(id)?;
        self.lookup_namespace(id, el.prefix())
    }

    /// Element `id` is `ns:local`, matched by namespace URI rather than prefix.
    pub fn is(&self, id: NodeId, ns: Ns, local: &str) -> bool {
        match self.element(id) {
            Some(el) => el.local_name() == local && self.namespace(id) == Some(ns.uri),
            None => false,
        }
    }

    /// Prefix bound to `ns` on the root element, declaring the conventional prefix if the
    /// namespace is not declared there yet.
    pub fn prefix_for(&mut self, ns: Ns) -> String {
        let Some(root) = self.root() else {
            return ns.prefix.to_string();
        };
        if let Some(el) = self.element(root) {
            for (k, v) in &el.attrs {
                if v == ns.uri {
                    if let Some(p) = k.strip_prefix("xmlns:") {
                        return p.to_string();
                    }
                }
            }
            if ns.prefix == "xml" {
                return ns.prefix.to_string();
            }
            let key = format!("xmlns:{}", ns.prefix);
            if el.attr(&key).is_some() {
                // Conventional prefix is taken by another URI; the undeclared form still
                // resolves through the well-known fallback.
                return ns.prefix.to_string();
            }
        }
        if let Some(el) = self.element_mut(root) {
            el.attrs.push((format!("xmlns:{}", ns.prefix), ns.uri.to_string()));
        }
        ns.prefix.to_string()
    }

    pub fn qualify(&mut self, ns: Ns, local: &str) -> String {
        let prefix = self.prefix_for(ns);
        format!("{prefix}:{local}")
    }

    /// Create a detached `ns:local` element using the prefix the document binds to `ns`.
    pub fn new_element(&mut self, ns: Ns, local: &str) -> NodeId {
        let name = self.qualify(ns, local);
        self.create_element(name)
    }

    /// Read attribute `ns:local` on `id`, matching by namespace URI.
    pub fn ns_attr(&self, id: NodeId, ns: Ns, local: &str) -> Option<&str> {
        let el = self.element(id)?;
        el.attrs.iter().find_map(|(k, v)| {
            let (prefix, l) = k.split_once(':')?;
            if l != local || prefix == "xmlns" {
                return None;
            }
            (self.lookup_namespace(id, Some(prefix)) == Some(ns.uri)).then_some(v.as_str())
        })
    }

    /// Set attribute `ns:local`, reusing the attribute's existing spelling when present.
    pub fn set_ns_attr(&mut self, id: NodeId, ns: Ns, local: &str, value: impl Into<String>) {
        let existing = self.element(id).and_then(|el| {
            el.attrs.iter().position(|(k, _)| match k.split_once(':') {
                Some((p, l)) => {
                    l == local && p != "xmlns" && self.lookup_namespace(id, Some(p)) == Some(ns.uri)
                }
                None => false,
            })
        });
        let value = value.into();
        if let Some(pos) = existing {
            if let Some(el) = self.element_mut(id) {
                el.attrs[pos].1 = value;
            }
            return;
        }
        let key = self.qualify(ns, local);
        if let Some(el) = self.element_mut(id) {
            el.attrs.push((key, value));
        }
    }

    pub fn remove_ns_attr(&mut self, id: NodeId, ns: Ns, local: &str) -> Option<String> {
        let pos = self.element(id).and_then(|el| {
            el.attrs.iter().position(|(k, _)| match k.split_once(':') {
                Some((p, l)) => {
                    l == local && p != "xmlns" && self.lookup_namespace(id, Some(p)) == Some(ns.uri)
                }
                None => false,
            })
        })?;
        self.element_mut(id).map(|el| el.attrs.remove(pos).1)
    }

    /// Plain (unprefixed) attribute.
    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        self.element(id).and_then(|el| el.attr(key))
    }

    pub fn set_attr(&mut self, id: NodeId, key: &str, value: impl Into<String>) {
        if let Some(el) = self.element_mut(id) {
            el.set_attr(key, value);
        }
    }

    /// Rename an element, keeping its prefix binding for `ns`.
    pub fn rename(&mut self, id: NodeId, ns: Ns, local: &str) {
        let name = match self.element(id).and_then(|el| el.prefix().map(str::to_string)) {
            Some(p) if self.lookup_namespace(id, Some(&p)) == Some(ns.uri) => format!("{p}:{local}"),
            _ => self.qualify(ns, local),
        };
        if let Some(el) = self.element_mut(id) {
            el.name = name;
        }
    }

    // ---------------------------------------------------------------------------------------
    // Search
    // ---------------------------------------------------------------------------------------

    /// Preorder walk of `id` and all its descendants (elements and other nodes).
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            for c in self.children(n).iter().rev() {
                stack.push(*c);
            }
        }
        out
    }

    /// All `ns:local` elements in the subtree of `id`, including `id` itself, in document order.
    pub fn find_all(&self, id: NodeId, ns: Ns, local: &str) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|n| self.is(*n, ns, local))
            .collect()
    }

    /// First `ns:local` strict descendant of `id`.
    pub fn find_first(&self, id: NodeId, ns: Ns, local: &str) -> Option<NodeId> {
        self.descendants(id)
            .into_iter()
            .skip(1)
            .find(|n| self.is(*n, ns, local))
    }

    pub fn find_child(&self, id: NodeId, ns: Ns, local: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|c| self.is(*c, ns, local))
    }

    pub fn find_children(&self, id: NodeId, ns: Ns, local: &str) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.is(*c, ns, local))
            .collect()
    }

    /// Concatenated character data directly under `id`.
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for c in self.children(id) {
            match self.data(*c) {
                NodeData::Text(t) | NodeData::CData(t) => out.push_str(t),
                _ => {}
            }
        }
        out
    }

    /// Replace all children of `id` with a single text node.
    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        for c in self.children(id).to_vec() {
            self.detach(c);
        }
        let t = self.create_text(text);
        self.append_child(id, t);
    }

    // ---------------------------------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------------------------------

    /// Remove `id` from its parent. The subtree stays intact and can be re-inserted.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
    }

    pub fn insert_before(&mut self, sibling: NodeId, child: NodeId) {
        if let (Some(parent), Some(idx)) = (self.parent(sibling), self.index_in_parent(sibling)) {
            self.insert_child(parent, idx, child);
        }
    }

    pub fn insert_after(&mut self, sibling: NodeId, child: NodeId) {
        if let (Some(parent), Some(idx)) = (self.parent(sibling), self.index_in_parent(sibling)) {
            self.insert_child(parent, idx + 1, child);
        }
    }

    /// Replace the child list of `parent` with `order`, which must be a permutation of the
    /// current children.
    pub fn reorder_children(&mut self, parent: NodeId, order: Vec<NodeId>) {
        debug_assert_eq!(order.len(), self.nodes[parent.0].children.len());
        self.nodes[parent.0].children = order;
    }

    /// Copy the subtree at `id` into a new detached subtree of this tree.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let data = self.nodes[id.0].data.clone();
        let copy = self.push(data);
        for c in self.children(id).to_vec() {
            let cc = self.deep_clone(c);
            self.append_child(copy, cc);
        }
        copy
    }

    /// Copy the subtree at `id` of `other` into a new detached subtree of this tree.
    ///
    /// Prefixes are copied verbatim; namespace declarations in scope at `id` in `other` that
    /// this tree's root lacks are added to the copied element.
    pub fn import(&mut self, other: &XmlTree, id: NodeId) -> NodeId {
        let copy = self.import_inner(other, id);
        let mut missing = Vec::new();
        for n in other.descendants(id) {
            let Some(el) = other.element(n) else { continue };
            let prefixes = std::iter::once(el.prefix())
                .chain(el.attrs.iter().map(|(k, _)| k.split_once(':').map(|(p, _)| p)));
            for p in prefixes.flatten() {
                if p == "xmlns" || p == "xml" || missing.iter().any(|(mp, _)| mp == p) {
                    continue;
                }
                let Some(uri) = other.lookup_namespace(n, Some(p)) else { continue };
                let known = self
                    .root()
                    .and_then(|r| self.element(r))
                    .and_then(|el| el.attr(&format!("xmlns:{p}")))
                    .is_some_and(|u| u == uri);
                if !known {
                    missing.push((p.to_string(), uri.to_string()));
                }
            }
        }
        if let Some(el) = self.element_mut(copy) {
            for (p, uri) in missing {
                el.set_attr(&format!("xmlns:{p}"), uri);
            }
        }
        copy
    }

    fn import_inner(&mut self, other: &XmlTree, id: NodeId) -> NodeId {
        let copy = self.push(other.data(id).clone());
        for c in other.children(id) {
            let cc = self.import_inner(other, *c);
            self.append_child(copy, cc);
        }
        copy
    }

    /// Structural equality of the reachable trees (detached arena garbage is ignored).
    pub fn same_structure(&self, other: &XmlTree) -> bool {
        fn eq(a: &XmlTree, an: NodeId, b: &XmlTree, bn: NodeId) -> bool {
            if a.data(an) != b.data(bn) {
                return false;
            }
            let (ac, bc) = (a.children(an), b.children(bn));
            ac.len() == bc.len() && ac.iter().zip(bc).all(|(x, y)| eq(a, *x, b, *y))
        }
        self.decl == other.decl && eq(self, DOCUMENT, other, DOCUMENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docx::vocab::{W, W14};

    fn sample() -> (XmlTree, NodeId) {
        let mut tree = XmlTree::with_root(W, "document", &[]);
        let root = tree.root().unwrap();
        let body = tree.new_element(W, "body");
        tree.append_child(root, body);
        (tree, body)
    }

    #[test]
    fn new_element_reuses_declared_prefix() {
        let mut tree = XmlTree::new();
        let mut el = Element::new("ns0:document");
        el.attrs.push(("xmlns:ns0".into(), W.uri.into()));
        let root = tree.create_node(NodeData::Element(el));
        tree.append_child(tree.document(), root);

        let p = tree.new_element(W, "p");
        tree.append_child(root, p);
        assert_eq!(tree.name(p), Some("ns0:p"));
        assert!(tree.is(p, W, "p"));
    }

    #[test]
    fn undeclared_prefix_adds_declaration_to_root() {
        let (mut tree, body) = sample();
        let p = tree.new_element(W, "p");
        tree.append_child(body, p);
        tree.set_ns_attr(p, W14, "paraId", "0000ABCD");
        let root = tree.root().unwrap();
        assert_eq!(tree.attr(root, "xmlns:w14"), Some(W14.uri));
        assert_eq!(tree.ns_attr(p, W14, "paraId"), Some("0000ABCD"));
    }

    #[test]
    fn detach_and_reinsert_moves_subtree() {
        let (mut tree, body) = sample();
        let a = tree.new_element(W, "p");
        let b = tree.new_element(W, "tbl");
        tree.append_child(body, a);
        tree.append_child(body, b);
        tree.insert_before(a, b);
        assert_eq!(tree.children(body), &[b, a]);
        tree.detach(a);
        assert_eq!(tree.children(body), &[b]);
        assert_eq!(tree.parent(a), None);
    }

    #[test]
    fn deep_clone_is_independent() {
        let (mut tree, body) = sample();
        let r = tree.new_element(W, "r");
        let t = tree.new_element(W, "t");
        tree.append_child(body, r);
        tree.append_child(r, t);
        tree.set_text(t, "hi");
        let copy = tree.deep_clone(r);
        let copy_t = tree.find_child(copy, W, "t").unwrap();
        tree.set_text(copy_t, "bye");
        assert_eq!(tree.text(t), "hi");
        assert_eq!(tree.parent(copy), None);
    }

    #[test]
    fn same_structure_ignores_detached_garbage() {
        let (mut a, body) = sample();
        let b = a.clone();
        let junk = a.new_element(W, "p");
        a.append_child(body, junk);
        a.detach(junk);
        assert!(a.same_structure(&b));
    }
}
