//! The fixed set of CRM tables and their load order.
//!
//! Each table declares the tables its foreign keys point at. Ranks are not
//! maintained by hand: they come from a topological sort of that graph, so a
//! child can never be scheduled before one of its parents.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::TableSpec;
use crate::error::{MigrateError, Result};

/// A table and the tables it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDecl {
    pub name: String,
    pub parents: Vec<String>,
}

impl TableDecl {
    pub fn new(name: &str, parents: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Every table the migration moves, with its foreign-key parents.
const CRM_TABLES: &[(&str, &[&str])] = &[
    ("branches", &[]),
    ("dashboard_users", &["branches"]),
    ("universities", &[]),
    ("courses", &["universities"]),
    ("lead_sources", &[]),
    ("leads", &["branches", "dashboard_users", "courses", "lead_sources"]),
    ("lead_followups", &["leads", "dashboard_users"]),
    ("students", &["leads", "branches", "universities", "courses"]),
    ("student_documents", &["students"]),
    ("applications", &["students", "universities", "courses"]),
    ("fee_structures", &["courses"]),
    ("payments", &["students", "fee_structures", "dashboard_users"]),
    ("vouchers", &["payments", "branches"]),
    ("expenses", &["branches", "dashboard_users"]),
    ("employees", &["branches", "dashboard_users"]),
    ("attendance", &["employees"]),
    ("payroll", &["employees"]),
    ("notifications", &["dashboard_users"]),
    ("activity_logs", &["dashboard_users"]),
];

/// Declared tables plus the ranking logic.
#[derive(Debug, Clone)]
pub struct TableCatalog {
    decls: Vec<TableDecl>,
}

impl TableCatalog {
    /// Catalog over the version-controlled CRM table list.
    pub fn builtin() -> Self {
        Self::new(
            CRM_TABLES
                .iter()
                .map(|(name, parents)| TableDecl::new(name, parents)),
        )
    }

    pub fn new(decls: impl IntoIterator<Item = TableDecl>) -> Self {
        Self {
            decls: decls.into_iter().collect(),
        }
    }

    /// Declared table names, in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.decls.iter().map(|d| d.name.as_str())
    }

    /// Parents declared for `table`.
    pub fn parents(&self, table: &str) -> Option<&[String]> {
        self.decls
            .iter()
            .find(|d| d.name == table)
            .map(|d| d.parents.as_slice())
    }

    /// Rank every table so parents come first.
    ///
    /// A table's depth is one more than its deepest parent; tables are
    /// ordered by depth, then by declaration order, and ranked by position,
    /// so ranks are unique. Unknown parents, duplicate names, and cycles are
    /// configuration errors. Self-references are allowed and ignored.
    pub fn plan(&self) -> Result<Vec<TableSpec>> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

        for (pos, decl) in self.decls.iter().enumerate() {
            if nodes.insert(decl.name.as_str(), graph.add_node(pos)).is_some() {
                return Err(MigrateError::Config(format!(
                    "table '{}' is declared twice",
                    decl.name
                )));
            }
        }

        for decl in &self.decls {
            let child = nodes[decl.name.as_str()];
            for parent in &decl.parents {
                if parent == &decl.name {
                    continue;
                }
                let parent_idx = nodes.get(parent.as_str()).ok_or_else(|| {
                    MigrateError::Config(format!(
                        "table '{}' references undeclared table '{}'",
                        decl.name, parent
                    ))
                })?;
                graph.update_edge(*parent_idx, child, ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            MigrateError::Config(format!(
                "foreign-key cycle involving table '{}'",
                self.decls[graph[cycle.node_id()]].name
            ))
        })?;

        let mut depth = vec![0u32; self.decls.len()];
        for idx in order {
            let pos = graph[idx];
            let d = graph
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .map(|parent| depth[graph[parent]] + 1)
                .max()
                .unwrap_or(0);
            depth[pos] = d;
        }

        let mut positions: Vec<usize> = (0..self.decls.len()).collect();
        positions.sort_by_key(|&pos| (depth[pos], pos));

        Ok(positions
            .into_iter()
            .enumerate()
            .map(|(rank, pos)| TableSpec::new(self.decls[pos].name.clone(), rank as u32))
            .collect())
    }
}

impl Default for TableCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank_of(plan: &[TableSpec], name: &str) -> u32 {
        plan.iter().find(|s| s.name == name).unwrap().rank
    }

    #[test]
    fn test_builtin_plan_respects_every_foreign_key() {
        let catalog = TableCatalog::builtin();
        let plan = catalog.plan().unwrap();

        assert_eq!(plan.len(), catalog.names().count());
        for spec in &plan {
            for parent in catalog.parents(&spec.name).unwrap() {
                assert!(
                    rank_of(&plan, parent) < spec.rank,
                    "{} must load before {}",
                    parent,
                    spec.name
                );
            }
        }
    }

    #[test]
    fn test_ranks_are_unique_and_sorted() {
        let plan = TableCatalog::builtin().plan().unwrap();
        let ranks: Vec<u32> = plan.iter().map(|s| s.rank).collect();
        let expected: Vec<u32> = (0..plan.len() as u32).collect();
        assert_eq!(ranks, expected);
    }

    #[test]
    fn test_declaration_order_breaks_ties() {
        let catalog = TableCatalog::new([
            TableDecl::new("leads", &["branches"]),
            TableDecl::new("universities", &[]),
            TableDecl::new("branches", &[]),
        ]);
        let plan = catalog.plan().unwrap();
        let names: Vec<_> = plan.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["universities", "branches", "leads"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let catalog = TableCatalog::new([
            TableDecl::new("a", &["b"]),
            TableDecl::new("b", &["a"]),
        ]);
        assert!(matches!(catalog.plan(), Err(MigrateError::Config(_))));
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let catalog = TableCatalog::new([TableDecl::new("leads", &["branches"])]);
        let err = catalog.plan().unwrap_err();
        assert!(err.to_string().contains("undeclared table 'branches'"));
    }

    #[test]
    fn test_self_reference_is_ignored() {
        let catalog = TableCatalog::new([TableDecl::new("employees", &["employees"])]);
        let plan = catalog.plan().unwrap();
        assert_eq!(plan, vec![TableSpec::new("employees", 0)]);
    }
}
