//! Target-table dependency graph.
//!
//! Tables can declare that they read other tables' output. The graph
//! validates those declarations at registration time and yields a
//! processing order in which every table runs after the tables it depends
//! on. Cycles are a configuration error and are reported with the full
//! dependency path, not discovered at runtime.

use rustc_hash::FxHashMap;

/// Rejected table topology.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The same table name was registered twice.
    #[error("table '{0}' is registered twice")]
    DuplicateTable(String),
    /// A table depends on a name that was never registered.
    #[error("table '{table}' depends on unknown table '{depends_on}'")]
    UnknownDependency {
        /// The declaring table.
        table: String,
        /// The missing dependency.
        depends_on: String,
    },
    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected: {0}")]
    CycleDetected(String),
}

/// Dependency graph over registered table names.
#[derive(Debug, Default)]
pub struct TableGraph {
    names: Vec<String>,
    index: FxHashMap<String, usize>,
    depends_on: Vec<Vec<usize>>,
}

impl TableGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if no tables are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Registers a table.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateTable`] if the name is already
    /// registered.
    pub fn add_table(&mut self, name: impl Into<String>) -> Result<(), GraphError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateTable(name));
        }
        self.index.insert(name.clone(), self.names.len());
        self.names.push(name);
        self.depends_on.push(Vec::new());
        Ok(())
    }

    /// Declares that `table` reads the output of `depends_on`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownDependency`] if either name is not
    /// registered.
    pub fn add_dependency(&mut self, table: &str, depends_on: &str) -> Result<(), GraphError> {
        let unknown = |missing: &str| GraphError::UnknownDependency {
            table: table.to_string(),
            depends_on: missing.to_string(),
        };
        let from = *self.index.get(table).ok_or_else(|| unknown(table))?;
        let to = *self.index.get(depends_on).ok_or_else(|| unknown(depends_on))?;
        self.depends_on[from].push(to);
        Ok(())
    }

    /// Computes a processing order in which every table follows its
    /// dependencies.
    ///
    /// The order is deterministic: ties resolve by registration order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] with the offending path if
    /// the declarations form a cycle, including a table depending on
    /// itself.
    pub fn processing_order(&self) -> Result<Vec<String>, GraphError> {
        let mut colors = vec![Color::White; self.names.len()];
        let mut order = Vec::with_capacity(self.names.len());
        let mut path = Vec::new();

        for node in 0..self.names.len() {
            if colors[node] == Color::White {
                self.visit(node, &mut colors, &mut order, &mut path)?;
            }
        }
        Ok(order.into_iter().map(|i| self.names[i].clone()).collect())
    }

    fn visit(
        &self,
        node: usize,
        colors: &mut [Color],
        order: &mut Vec<usize>,
        path: &mut Vec<usize>,
    ) -> Result<(), GraphError> {
        colors[node] = Color::Gray;
        path.push(node);

        for &dep in &self.depends_on[node] {
            match colors[dep] {
                Color::White => self.visit(dep, colors, order, path)?,
                Color::Gray => {
                    let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<&str> =
                        path[start..].iter().map(|&n| self.names[n].as_str()).collect();
                    cycle.push(self.names[dep].as_str());
                    return Err(GraphError::CycleDetected(cycle.join(" -> ")));
                }
                Color::Black => {}
            }
        }

        path.pop();
        colors[node] = Color::Black;
        order.push(node);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}
