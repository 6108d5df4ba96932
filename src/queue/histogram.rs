//! Per-method compilation report
//!
//! ```text
//!   Code Size; Nodes Parsing; Nodes Before; Nodes After; Is Trivial; Deopt Target; Entry; Direct; Virtual; Method
//!         412;            38;           97;          81;      false;        false;     1;      0;       0; main
//! ```

use std::fmt;

use itertools::Itertools;

use crate::universe::{MethodUnit, Multiplicity};
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramRow {
    pub method: String,
    pub code_size: usize,
    pub nodes_after_parsing: usize,
    pub nodes_before_compile: usize,
    pub nodes_after_compile: usize,
    pub trivial: bool,
    pub deopt_target: bool,
    pub entry_point: u32,
    pub direct_calls: u32,
    pub virtual_calls: u32,
}

impl HistogramRow {
    pub fn new(unit: &MethodUnit, code_size: usize) -> Self {
        let c = &unit.counters;
        Self {
            method: unit.qualified_name(),
            code_size,
            nodes_after_parsing: c.nodes_after_parsing.load(Ordering::Relaxed),
            nodes_before_compile: c.nodes_before_compile.load(Ordering::Relaxed),
            nodes_after_compile: c.nodes_after_compile.load(Ordering::Relaxed),
            trivial: unit.is_trivial(),
            deopt_target: unit.multiplicity() == Multiplicity::DeoptTarget,
            entry_point: c.entry_point.load(Ordering::Relaxed),
            direct_calls: c.direct_calls.load(Ordering::Relaxed),
            virtual_calls: c.virtual_calls.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodHistogram {
    rows: Vec<HistogramRow>,
}

impl MethodHistogram {
    /// Rows sorted by descending code size, then name.
    pub fn new(rows: impl IntoIterator<Item = HistogramRow>) -> Self {
        let rows = rows
            .into_iter()
            .sorted_by(|a, b| {
                b.code_size
                    .cmp(&a.code_size)
                    .then_with(|| a.method.cmp(&b.method))
            })
            .collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[HistogramRow] {
        &self.rows
    }

    pub fn total_code_size(&self) -> usize {
        self.rows.iter().map(|r| r.code_size).sum()
    }

    pub fn total_nodes_after_compile(&self) -> usize {
        self.rows.iter().map(|r| r.nodes_after_compile).sum()
    }
}

impl fmt::Display for MethodHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Code Size; Nodes Parsing; Nodes Before; Nodes After; Is Trivial; Deopt Target; Entry; Direct; Virtual; Method"
        )?;
        for r in &self.rows {
            writeln!(
                f,
                "{:>9}; {:>13}; {:>12}; {:>11}; {:>10}; {:>12}; {:>5}; {:>6}; {:>7}; {}",
                r.code_size,
                r.nodes_after_parsing,
                r.nodes_before_compile,
                r.nodes_after_compile,
                r.trivial,
                r.deopt_target,
                r.entry_point,
                r.direct_calls,
                r.virtual_calls,
                r.method
            )?;
        }
        write!(
            f,
            "{:>9}; {:>13}; {:>12}; {:>11}; {:>10}; {:>12}; {:>5}; {:>6}; {:>7}; TOTAL ({} methods)",
            self.total_code_size(),
            self.rows.iter().map(|r| r.nodes_after_parsing).sum::<usize>(),
            self.rows.iter().map(|r| r.nodes_before_compile).sum::<usize>(),
            self.total_nodes_after_compile(),
            self.rows.iter().filter(|r| r.trivial).count(),
            self.rows.iter().filter(|r| r.deopt_target).count(),
            "",
            "",
            "",
            self.rows.len()
        )
    }
}
