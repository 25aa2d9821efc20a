//! Utility functions for the container
//!
//! Naming helpers used for default bean names and qualifier matching, and
//! dependency graph helpers used by static validation and scope teardown.

/// Naming convention utilities for bean names
pub mod naming {
    /// Converts a PascalCase type name to camelCase for bean naming.
    ///
    /// This is the default bean naming strategy: `UserService` becomes `userService`.
    ///
    /// # Examples
    ///
    /// ```
    /// use wyvern_core::utils::naming::to_camel_case;
    ///
    /// assert_eq!(to_camel_case("UserService"), "userService");
    /// assert_eq!(to_camel_case("A"), "a");
    /// assert_eq!(to_camel_case(""), "");
    /// ```
    pub fn to_camel_case(s: &str) -> String {
        let mut chars = s.chars();
        match chars.next() {
            None => String::new(),
            Some(first) => {
                let mut result = String::with_capacity(s.len());
                result.extend(first.to_lowercase());
                result.push_str(chars.as_str());
                result
            }
        }
    }

    /// Extracts the simple name from a fully qualified Rust type name.
    ///
    /// Module paths, generic arguments and a leading `dyn ` are stripped.
    ///
    /// ```
    /// use wyvern_core::utils::naming::simple_type_name;
    ///
    /// assert_eq!(simple_type_name("app::engine::V8Engine"), "V8Engine");
    /// assert_eq!(simple_type_name("dyn app::Greeter"), "Greeter");
    /// assert_eq!(simple_type_name("alloc::vec::Vec<app::Item>"), "Vec");
    /// ```
    pub fn simple_type_name(full: &str) -> &str {
        let trimmed = full.trim_start_matches("dyn ");
        let without_generics = match trimmed.find('<') {
            Some(idx) => &trimmed[..idx],
            None => trimmed,
        };
        let without_bounds = without_generics
            .split(" + ")
            .next()
            .unwrap_or(without_generics);
        without_bounds.rsplit("::").next().unwrap_or(without_bounds)
    }
}

/// Dependency graph utilities
pub mod dependency {
    use std::collections::{HashMap, HashSet};
    use std::fmt;

    /// A problem found in a static dependency graph
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DependencyIssue {
        Missing { bean: String, dependency: String },
        /// Names along the cycle, first name repeated at the end
        Cycle(Vec<String>),
    }

    impl fmt::Display for DependencyIssue {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                DependencyIssue::Missing { bean, dependency } => {
                    write!(f, "Bean '{}' requires '{}' but no such bean is available", bean, dependency)
                }
                DependencyIssue::Cycle(path) => write!(f, "Dependency cycle: {}", path.join(" -> ")),
            }
        }
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    /// Named nodes with edges to the names they depend on
    ///
    /// Insertion order fixes the order checks run in, so the reported issue is
    /// deterministic.
    #[derive(Debug, Default)]
    pub struct DependencyGraph {
        nodes: Vec<String>,
        index: HashMap<String, usize>,
        edges: Vec<Vec<String>>,
    }

    impl DependencyGraph {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_node(&mut self, name: impl Into<String>, dependencies: Vec<String>) {
            let name = name.into();
            self.index.insert(name.clone(), self.nodes.len());
            self.nodes.push(name);
            self.edges.push(dependencies);
        }

        pub fn len(&self) -> usize {
            self.nodes.len()
        }

        pub fn is_empty(&self) -> bool {
            self.nodes.is_empty()
        }

        /// Missing dependencies are reported before cycles
        pub fn validate(&self) -> Result<(), DependencyIssue> {
            if let Some(issue) = self.find_missing() {
                return Err(issue);
            }
            match self.find_cycle() {
                Some(path) => Err(DependencyIssue::Cycle(path)),
                None => Ok(()),
            }
        }

        fn find_missing(&self) -> Option<DependencyIssue> {
            self.nodes.iter().zip(&self.edges).find_map(|(bean, dependencies)| {
                dependencies
                    .iter()
                    .find(|d| !self.index.contains_key(d.as_str()))
                    .map(|dependency| DependencyIssue::Missing {
                        bean: bean.clone(),
                        dependency: dependency.clone(),
                    })
            })
        }

        fn find_cycle(&self) -> Option<Vec<String>> {
            let targets: Vec<Vec<usize>> = self
                .edges
                .iter()
                .map(|deps| deps.iter().filter_map(|d| self.index.get(d).copied()).collect())
                .collect();
            let mut marks = vec![Mark::New; self.nodes.len()];

            for root in 0..self.nodes.len() {
                if marks[root] != Mark::New {
                    continue;
                }
                marks[root] = Mark::Active;
                let mut stack = vec![(root, 0usize)];

                while let Some(top) = stack.last_mut() {
                    let (node, cursor) = *top;
                    let Some(&next) = targets[node].get(cursor) else {
                        marks[node] = Mark::Done;
                        stack.pop();
                        continue;
                    };
                    top.1 += 1;

                    match marks[next] {
                        Mark::New => {
                            marks[next] = Mark::Active;
                            stack.push((next, 0));
                        }
                        Mark::Active => {
                            let start = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                            let mut path: Vec<String> =
                                stack[start..].iter().map(|&(n, _)| self.nodes[n].clone()).collect();
                            path.push(self.nodes[next].clone());
                            return Some(path);
                        }
                        Mark::Done => {}
                    }
                }
            }
            None
        }
    }

    /// Orders nodes so that every node comes before the nodes it depends on
    ///
    /// This is teardown order: dependents first, dependencies last. `edges[i]`
    /// lists the indices node `i` depends on. Among nodes that are ready at the
    /// same time, later nodes (by index) come first. Edges pointing outside the
    /// node range are ignored, and nodes caught in a cycle are appended in
    /// reverse index order.
    pub fn destruction_order(edges: &[Vec<usize>]) -> Vec<usize> {
        let n = edges.len();
        // dependents[i]: nodes that depend on i
        let mut remaining_dependents = vec![0usize; n];
        for deps in edges {
            let unique: HashSet<usize> = deps.iter().copied().filter(|&d| d < n).collect();
            for d in unique {
                remaining_dependents[d] += 1;
            }
        }

        let mut ready: Vec<usize> = (0..n).filter(|&i| remaining_dependents[i] == 0).collect();
        let mut emitted = vec![false; n];
        let mut order = Vec::with_capacity(n);

        // ready is kept ascending; pop takes the highest index
        while let Some(node) = ready.pop() {
            emitted[node] = true;
            order.push(node);
            let unique: HashSet<usize> = edges[node].iter().copied().filter(|&d| d < n).collect();
            for d in unique {
                remaining_dependents[d] -= 1;
                if remaining_dependents[d] == 0 {
                    let pos = ready.partition_point(|&x| x < d);
                    ready.insert(pos, d);
                }
            }
        }

        if order.len() < n {
            order.extend((0..n).rev().filter(|&i| !emitted[i]));
        }
        order
    }
}
