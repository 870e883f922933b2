//! Radix tree for route matching.
//!
//! The tree maps `(method, path)` pairs to registered values. Patterns are
//! segment sequences where each segment is a static literal, a named
//! parameter (`:name`), or a trailing catch-all (`*name`). Children of a
//! node are kept in priority order — static, then parameter, then catch-all
//! — so static literals always win over parameters and parameters win over
//! catch-alls. The tree is built during router setup and never mutated
//! afterwards, so lookups need no locking.
//!
//! Registration failures (bad grammar, duplicate routes, conflicting
//! parameter names) panic: they are programmer errors, not runtime
//! conditions. Lookup never fails — "no match" is a first-class result.

use std::collections::HashMap;

use crate::http::Method;

/// Outcome of a tree lookup.
#[derive(Debug)]
pub enum RouteMatch<'a, T> {
    /// A node with a handler for the requested method was reached.
    Matched {
        value: &'a T,
        /// Extracted `(name, value)` parameter bindings in path order.
        params: Vec<(String, String)>,
    },
    /// A node was reached but it has no handler for this method.
    /// `allowed` lists the methods it does handle, for the `Allow` header.
    MethodNotAllowed { allowed: Vec<Method> },
    /// No node matched the path.
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Static,
    Param,
    CatchAll,
}

#[derive(Debug)]
struct Node<T> {
    /// The segment literal for static nodes; the parameter name otherwise.
    literal: String,
    kind: NodeKind,
    /// Sorted by kind priority: statics first, then at most one param,
    /// then at most one catch-all.
    children: Vec<Node<T>>,
    /// Route values keyed by method.
    values: HashMap<Method, T>,
}

impl<T> Node<T> {
    fn new(literal: String, kind: NodeKind) -> Self {
        Self {
            literal,
            kind,
            children: Vec::new(),
            values: HashMap::new(),
        }
    }

    /// Finds or creates the child for `segment`, enforcing the single-param /
    /// single-catch-all invariant and merging same-kind children.
    fn child_for(&mut self, segment: &Segment, pattern: &str) -> &mut Node<T> {
        let (kind, literal) = match segment {
            Segment::Static(s) => (NodeKind::Static, s.as_str()),
            Segment::Param(name) => (NodeKind::Param, name.as_str()),
            Segment::CatchAll(name) => (NodeKind::CatchAll, name.as_str()),
        };

        let existing = self
            .children
            .iter()
            .position(|child| match kind {
                NodeKind::Static => child.kind == kind && child.literal == literal,
                // At most one param and one catch-all child per node.
                NodeKind::Param | NodeKind::CatchAll => child.kind == kind,
            });

        let index = match existing {
            Some(index) => {
                let child = &self.children[index];
                if child.kind != NodeKind::Static && child.literal != literal {
                    panic!(
                        "conflicting parameter name '{literal}' in pattern '{pattern}': \
                         position already registered as '{}'",
                        child.literal
                    );
                }
                index
            }
            None => {
                let node = Node::new(literal.to_owned(), kind);
                // Insert keeping priority order: statics, param, catch-all.
                let index = self
                    .children
                    .iter()
                    .position(|child| priority(child.kind) > priority(kind))
                    .unwrap_or(self.children.len());
                self.children.insert(index, node);
                index
            }
        };

        &mut self.children[index]
    }
}

fn priority(kind: NodeKind) -> u8 {
    match kind {
        NodeKind::Static => 0,
        NodeKind::Param => 1,
        NodeKind::CatchAll => 2,
    }
}

#[derive(Debug)]
enum Segment {
    Static(String),
    Param(String),
    CatchAll(String),
}

/// A routing tree mapping `(method, pattern)` registrations to values of
/// type `T`.
#[derive(Debug)]
pub struct RouteTree<T> {
    root: Node<T>,
}

impl<T> Default for RouteTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RouteTree<T> {
    pub fn new() -> Self {
        Self {
            root: Node::new(String::new(), NodeKind::Static),
        }
    }

    /// Registers `value` under `(method, pattern)`.
    ///
    /// # Panics
    ///
    /// Panics when the pattern is empty, lacks a leading `/`, contains an
    /// empty or malformed segment, places a catch-all before the final
    /// segment, reuses a position with a different parameter name, or
    /// duplicates an existing `(method, pattern)` registration.
    pub fn insert(&mut self, method: Method, pattern: &str, value: T) {
        let segments = parse_pattern(pattern);

        let mut node = &mut self.root;
        for segment in &segments {
            node = node.child_for(segment, pattern);
        }

        if node.values.contains_key(&method) {
            panic!("duplicate route registration: {method} {pattern}");
        }
        node.values.insert(method, value);
    }

    /// Looks up `path` for `method`.
    ///
    /// Trailing slashes are normalized the same way registration normalizes
    /// patterns. Lookup never panics.
    pub fn find(&self, method: &Method, path: &str) -> RouteMatch<'_, T> {
        let path = normalize_path(path);
        if !path.starts_with('/') {
            return RouteMatch::NotFound;
        }

        let segments: Vec<&str> = if path == "/" {
            Vec::new()
        } else {
            path[1..].split('/').collect()
        };

        let mut params = Vec::new();
        let Some(node) = search(&self.root, &segments, &mut params) else {
            return RouteMatch::NotFound;
        };

        match node.values.get(method) {
            Some(value) => RouteMatch::Matched { value, params },
            None => {
                let mut allowed: Vec<Method> = node.values.keys().cloned().collect();
                allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                RouteMatch::MethodNotAllowed { allowed }
            }
        }
    }
}

/// Depth-first search honoring child priority order. Parameter bindings are
/// pushed before recursing and popped when the branch backtracks.
fn search<'a, T>(
    node: &'a Node<T>,
    segments: &[&str],
    params: &mut Vec<(String, String)>,
) -> Option<&'a Node<T>> {
    let Some((first, rest)) = segments.split_first() else {
        // Path exhausted: this node matches iff it holds any handler.
        return (!node.values.is_empty()).then_some(node);
    };

    for child in &node.children {
        match child.kind {
            NodeKind::Static => {
                if child.literal == *first {
                    if let Some(found) = search(child, rest, params) {
                        return Some(found);
                    }
                }
            }
            NodeKind::Param => {
                // Empty segments never bind.
                if first.is_empty() {
                    continue;
                }
                params.push((child.literal.clone(), (*first).to_owned()));
                if let Some(found) = search(child, rest, params) {
                    return Some(found);
                }
                params.pop();
            }
            NodeKind::CatchAll => {
                if child.values.is_empty() {
                    continue;
                }
                let mut remainder = (*first).to_owned();
                for segment in rest {
                    remainder.push('/');
                    remainder.push_str(segment);
                }
                params.push((child.literal.clone(), remainder));
                return Some(child);
            }
        }
    }
    None
}

/// Strips the trailing slash from everything but the root path.
fn normalize_path(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

/// Parses and validates a registration pattern into segments.
fn parse_pattern(pattern: &str) -> Vec<Segment> {
    if pattern.is_empty() {
        panic!("route pattern must not be empty");
    }
    if !pattern.starts_with('/') {
        panic!("route pattern '{pattern}' must start with '/'");
    }

    let pattern_norm = normalize_path(pattern);
    if pattern_norm == "/" {
        return Vec::new();
    }

    let raw: Vec<&str> = pattern_norm[1..].split('/').collect();
    let last = raw.len() - 1;
    raw.iter()
        .enumerate()
        .map(|(i, segment)| {
            if segment.is_empty() {
                panic!("route pattern '{pattern}' contains an empty segment");
            }
            if let Some(name) = segment.strip_prefix(':') {
                validate_name(name, pattern);
                Segment::Param(name.to_owned())
            } else if let Some(name) = segment.strip_prefix('*') {
                validate_name(name, pattern);
                if i != last {
                    panic!("catch-all segment '*{name}' in pattern '{pattern}' must be terminal");
                }
                Segment::CatchAll(name.to_owned())
            } else {
                Segment::Static((*segment).to_owned())
            }
        })
        .collect()
}

/// Parameter names follow `[A-Za-z_][A-Za-z0-9_]*`.
fn validate_name(name: &str, pattern: &str) {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        panic!("invalid parameter name '{name}' in pattern '{pattern}'");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(routes: &[(&str, &str)]) -> RouteTree<String> {
        let mut tree = RouteTree::new();
        for (method, pattern) in routes {
            let method: Method = method.parse().unwrap();
            tree.insert(method, pattern, (*pattern).to_owned());
        }
        tree
    }

    fn matched<'a>(tree: &'a RouteTree<String>, method: &str, path: &str) -> (&'a str, Vec<(String, String)>) {
        let method: Method = method.parse().unwrap();
        match tree.find(&method, path) {
            RouteMatch::Matched { value, params } => (value.as_str(), params),
            other => panic!("expected match for {path}, got {other:?}"),
        }
    }

    #[test]
    fn registered_pattern_is_found() {
        let tree = tree_with(&[("GET", "/users"), ("GET", "/users/active")]);
        assert_eq!(matched(&tree, "GET", "/users").0, "/users");
        assert_eq!(matched(&tree, "GET", "/users/active").0, "/users/active");
    }

    #[test]
    fn root_route_matches_root_path() {
        let tree = tree_with(&[("GET", "/")]);
        assert_eq!(matched(&tree, "GET", "/").0, "/");
    }

    #[test]
    fn param_binds_segment() {
        let tree = tree_with(&[("GET", "/users/:id")]);
        let (value, params) = matched(&tree, "GET", "/users/42");
        assert_eq!(value, "/users/:id");
        assert_eq!(params, vec![("id".to_owned(), "42".to_owned())]);
    }

    #[test]
    fn static_beats_param() {
        let tree = tree_with(&[("GET", "/users/me"), ("GET", "/users/:id")]);
        assert_eq!(matched(&tree, "GET", "/users/me").0, "/users/me");
        let (value, params) = matched(&tree, "GET", "/users/42");
        assert_eq!(value, "/users/:id");
        assert_eq!(params[0].1, "42");
    }

    #[test]
    fn param_beats_catch_all() {
        let tree = tree_with(&[("GET", "/files/:name"), ("GET", "/files/*rest")]);
        assert_eq!(matched(&tree, "GET", "/files/a").0, "/files/:name");
        assert_eq!(matched(&tree, "GET", "/files/a/b").0, "/files/*rest");
    }

    #[test]
    fn catch_all_joins_remaining_segments() {
        let tree = tree_with(&[("GET", "/files/*rest")]);
        let (_, params) = matched(&tree, "GET", "/files/a/b/c");
        assert_eq!(params, vec![("rest".to_owned(), "a/b/c".to_owned())]);
    }

    #[test]
    fn backtracks_from_dead_static_branch() {
        // /users/me exists but /users/me/posts does not; the param branch
        // must be retried after the static branch dead-ends.
        let tree = tree_with(&[("GET", "/users/me"), ("GET", "/users/:id/posts")]);
        let (value, params) = matched(&tree, "GET", "/users/me/posts");
        assert_eq!(value, "/users/:id/posts");
        assert_eq!(params, vec![("id".to_owned(), "me".to_owned())]);
    }

    #[test]
    fn backtrack_discards_param_bindings() {
        let tree = tree_with(&[("GET", "/a/:x/c"), ("GET", "/a/*rest")]);
        // ":x" binds b, then "d" fails against "c"; the binding must be
        // undone before the catch-all matches.
        let (value, params) = matched(&tree, "GET", "/a/b/d");
        assert_eq!(value, "/a/*rest");
        assert_eq!(params, vec![("rest".to_owned(), "b/d".to_owned())]);
    }

    #[test]
    fn multiple_params_bind_in_order() {
        let tree = tree_with(&[("GET", "/blog/:category/:post")]);
        let (_, params) = matched(&tree, "GET", "/blog/rust/routers");
        assert_eq!(
            params,
            vec![
                ("category".to_owned(), "rust".to_owned()),
                ("post".to_owned(), "routers".to_owned()),
            ]
        );
    }

    #[test]
    fn trailing_slash_normalized_both_ways() {
        let tree = tree_with(&[("GET", "/users/")]);
        assert_eq!(matched(&tree, "GET", "/users").0, "/users/");
        assert_eq!(matched(&tree, "GET", "/users/").0, "/users/");
    }

    #[test]
    fn method_not_allowed_lists_allowed_methods() {
        let tree = tree_with(&[("POST", "/x"), ("PUT", "/x")]);
        let method: Method = "GET".parse().unwrap();
        match tree.find(&method, "/x") {
            RouteMatch::MethodNotAllowed { allowed } => {
                assert_eq!(allowed, vec![Method::Post, Method::Put]);
            }
            other => panic!("expected MethodNotAllowed, got {other:?}"),
        }
    }

    #[test]
    fn unknown_path_is_not_found() {
        let tree = tree_with(&[("GET", "/users")]);
        let method: Method = "GET".parse().unwrap();
        assert!(matches!(
            tree.find(&method, "/posts"),
            RouteMatch::NotFound
        ));
    }

    #[test]
    fn partial_match_without_handler_is_not_found() {
        let tree = tree_with(&[("GET", "/a/b/c")]);
        let method: Method = "GET".parse().unwrap();
        assert!(matches!(tree.find(&method, "/a/b"), RouteMatch::NotFound));
    }

    #[test]
    fn same_param_name_merges_into_one_child() {
        let tree = tree_with(&[("GET", "/users/:id"), ("POST", "/users/:id")]);
        assert_eq!(matched(&tree, "GET", "/users/1").0, "/users/:id");
        assert_eq!(matched(&tree, "POST", "/users/1").0, "/users/:id");
    }

    #[test]
    #[should_panic(expected = "duplicate route registration")]
    fn duplicate_registration_panics() {
        tree_with(&[("GET", "/users"), ("GET", "/users")]);
    }

    #[test]
    #[should_panic(expected = "conflicting parameter name")]
    fn conflicting_param_names_panic() {
        tree_with(&[("GET", "/users/:id"), ("POST", "/users/:name")]);
    }

    #[test]
    #[should_panic(expected = "must be terminal")]
    fn catch_all_before_end_panics() {
        tree_with(&[("GET", "/files/*rest/meta")]);
    }

    #[test]
    #[should_panic(expected = "must start with '/'")]
    fn pattern_without_leading_slash_panics() {
        tree_with(&[("GET", "users")]);
    }

    #[test]
    #[should_panic(expected = "empty segment")]
    fn empty_segment_panics() {
        tree_with(&[("GET", "/users//posts")]);
    }

    #[test]
    #[should_panic(expected = "invalid parameter name")]
    fn invalid_param_name_panics() {
        tree_with(&[("GET", "/users/:1abc")]);
    }
}
