//! MNA matrix assembly and solving.
//!
//! The matrix is assembled in two phases. During analysis every element
//! stamps its linear contribution into the full system and marks the rows it
//! will touch again. [`MnaMatrix::simplify`] then pins every unknown that a
//! single unchanging row determines, drops that row, and snapshots the reduced
//! system. Each sub-iteration restores the snapshot and re-stamps the
//! nonlinear contributions on top of it.

use crate::circuit::{BranchId, NodeId, VarIndex};
use crate::error::{Result, SimError};

use super::row_info::RowInfo;
use super::Solution;

/// MNA matrix system Ax = z.
#[derive(Debug, Clone)]
pub struct MnaMatrix {
    /// Node count, ground and internal nodes included
    num_nodes: usize,
    /// Size of the full system
    full_size: usize,
    /// Size of the reduced system (equal to `full_size` before simplification)
    size: usize,
    /// Bookkeeping for each unknown of the full system
    rows: Vec<RowInfo>,
    /// System matrix A (row-major)
    a: Vec<f64>,
    /// Source vector z
    z: Vec<f64>,
    /// Snapshot of A after the linear stamps
    orig_a: Vec<f64>,
    /// Snapshot of z after the linear stamps
    orig_z: Vec<f64>,
    /// LU decomposition of A
    lu: Vec<f64>,
    /// Pivot indices for LU decomposition
    pivots: Vec<usize>,
    /// Solution vector x of the reduced system
    x: Vec<f64>,
    /// Stamps go through the row/column maps
    mapped: bool,
}

impl MnaMatrix {
    /// Create an empty full-size system for `num_nodes` nodes (ground
    /// included) and `num_branches` voltage-source unknowns.
    pub fn new(num_nodes: usize, num_branches: usize) -> Self {
        let full_size = num_nodes.saturating_sub(1) + num_branches;
        Self {
            num_nodes,
            full_size,
            size: full_size,
            rows: vec![RowInfo::default(); full_size],
            a: vec![0.0; full_size * full_size],
            z: vec![0.0; full_size],
            orig_a: Vec::new(),
            orig_z: Vec::new(),
            lu: Vec::new(),
            pivots: Vec::new(),
            x: Vec::new(),
            mapped: false,
        }
    }

    /// Size of the full system.
    pub fn full_size(&self) -> usize {
        self.full_size
    }

    /// Size of the system actually factored.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Node count, ground included.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Whether [`simplify`](Self::simplify) has run.
    pub fn is_simplified(&self) -> bool {
        self.mapped
    }

    /// Row bookkeeping for an unknown, `None` for ground.
    pub fn row_info(&self, var: impl Into<VarIndex>) -> Option<&RowInfo> {
        let index = var.into().to_index(self.num_nodes)?;
        self.rows.get(index)
    }

    /// Get an entry of the working matrix (reduced indices).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.a[row * self.size + col]
    }

    /// Get an entry of the working source vector (reduced index).
    pub fn rhs(&self, row: usize) -> f64 {
        self.z[row]
    }

    fn full_index(&self, var: VarIndex) -> Option<usize> {
        let index = var.to_index(self.num_nodes)?;
        if index >= self.full_size {
            panic!("{var:?} has no row in a system of size {}", self.full_size);
        }
        Some(index)
    }

    fn target_row(&self, full: usize) -> usize {
        if !self.mapped {
            return full;
        }
        match self.rows[full].map_row {
            Some(row) => row,
            None => panic!("stamp into row {full}, which was eliminated by simplification"),
        }
    }

    /// Add `x` at (row, col).
    ///
    /// A voltage change of dv at `col` increases the current leaving `row`
    /// by `x * dv`. Ground rows and columns are skipped. Once the system is
    /// simplified, a pinned column moves its contribution to the source vector.
    pub fn stamp_matrix(&mut self, row: impl Into<VarIndex>, col: impl Into<VarIndex>, x: f64) {
        let (Some(r), Some(c)) = (self.full_index(row.into()), self.full_index(col.into())) else {
            return;
        };
        let r = self.target_row(r);
        if self.mapped {
            let info = self.rows[c];
            if info.is_const {
                self.z[r] -= x * info.value;
                return;
            }
            if let Some(c) = info.map_col {
                self.a[r * self.size + c] += x;
            }
        } else {
            self.a[r * self.size + c] += x;
        }
    }

    /// Add `x` to the source vector at `row`: a current `x` injected into it.
    pub fn stamp_right_side(&mut self, row: impl Into<VarIndex>, x: f64) {
        if let Some(r) = self.full_index(row.into()) {
            let r = self.target_row(r);
            self.z[r] += x;
        }
    }

    /// Mark the source vector of `row` as changing between sub-iterations.
    pub fn mark_right_changes(&mut self, row: impl Into<VarIndex>) {
        if let Some(r) = self.full_index(row.into()) {
            self.rows[r].right_changes = true;
        }
    }

    /// Mark the matrix entries of `row` as changing between sub-iterations.
    pub fn stamp_non_linear(&mut self, row: impl Into<VarIndex>) {
        if let Some(r) = self.full_index(row.into()) {
            self.rows[r].left_changes = true;
        }
    }

    /// Stamp a conductance between two nodes.
    /// For a conductance G between nodes n1 and n2:
    ///   A[n1,n1] += G
    ///   A[n2,n2] += G
    ///   A[n1,n2] -= G
    ///   A[n2,n1] -= G
    pub fn stamp_conductance(&mut self, n1: NodeId, n2: NodeId, g: f64) {
        self.stamp_matrix(n1, n1, g);
        self.stamp_matrix(n2, n2, g);
        self.stamp_matrix(n1, n2, -g);
        self.stamp_matrix(n2, n1, -g);
    }

    /// Stamp a resistor between two nodes.
    ///
    /// A zero resistance produces an infinite conductance, which the
    /// finiteness check of the Newton loop reports.
    pub fn stamp_resistor(&mut self, n1: NodeId, n2: NodeId, r: f64) {
        self.stamp_conductance(n1, n2, 1.0 / r);
    }

    /// Stamp a current source driving `i` from n1 through the source into n2.
    pub fn stamp_current_source(&mut self, n1: NodeId, n2: NodeId, i: f64) {
        self.stamp_right_side(n1, -i);
        self.stamp_right_side(n2, i);
    }

    /// Stamp a voltage source enforcing V[n2] - V[n1] = v.
    ///
    /// The branch current flows from n1 through the source into n2.
    pub fn stamp_voltage_source(&mut self, n1: NodeId, n2: NodeId, branch: BranchId, v: f64) {
        self.stamp_source_pattern(n1, n2, branch);
        self.stamp_right_side(branch, v);
    }

    /// Stamp a voltage source whose value is written every sub-iteration with
    /// [`update_voltage_source`](Self::update_voltage_source).
    pub fn stamp_dynamic_voltage_source(&mut self, n1: NodeId, n2: NodeId, branch: BranchId) {
        self.stamp_source_pattern(n1, n2, branch);
        self.mark_right_changes(branch);
    }

    /// Set the value of a dynamic voltage source for this sub-iteration.
    pub fn update_voltage_source(&mut self, branch: BranchId, v: f64) {
        self.stamp_right_side(branch, v);
    }

    fn stamp_source_pattern(&mut self, n1: NodeId, n2: NodeId, branch: BranchId) {
        self.stamp_matrix(branch, n1, -1.0);
        self.stamp_matrix(branch, n2, 1.0);
        self.stamp_matrix(n1, branch, 1.0);
        self.stamp_matrix(n2, branch, -1.0);
    }

    /// Stamp a VCCS (Voltage-Controlled Current Source).
    /// I = g * (V[vn1] - V[vn2]), flowing from cn1 through the source into cn2.
    pub fn stamp_vccs(&mut self, cn1: NodeId, cn2: NodeId, vn1: NodeId, vn2: NodeId, g: f64) {
        self.stamp_matrix(cn1, vn1, g);
        self.stamp_matrix(cn2, vn2, g);
        self.stamp_matrix(cn1, vn2, -g);
        self.stamp_matrix(cn2, vn1, -g);
    }

    /// Stamp a CCCS (Current-Controlled Current Source).
    /// I = gain * I[branch], flowing from n1 through the source into n2.
    pub fn stamp_cccs(&mut self, n1: NodeId, n2: NodeId, branch: BranchId, gain: f64) {
        self.stamp_matrix(n1, branch, gain);
        self.stamp_matrix(n2, branch, -gain);
    }

    /// Eliminate unknowns fixed by the linear stamps and snapshot the result.
    ///
    /// A row with no changing entries and a single non-pinned nonzero entry
    /// pins that entry's unknown. The row is dropped and the scan restarts.
    pub fn simplify(&mut self) -> Result<()> {
        let n = self.full_size;
        let mut row = 0;
        while row < n {
            let info = self.rows[row];
            if info.changes() || info.drop_row {
                row += 1;
                continue;
            }

            let mut rs_add = 0.0;
            let mut pivot: Option<(usize, f64)> = None;
            let mut single = true;
            for col in 0..n {
                let q = self.a[row * n + col];
                let col_info = self.rows[col];
                if col_info.is_const {
                    rs_add -= col_info.value * q;
                    continue;
                }
                if q == 0.0 {
                    continue;
                }
                if pivot.is_none() {
                    pivot = Some((col, q));
                    continue;
                }
                single = false;
                break;
            }

            if !single {
                row += 1;
                continue;
            }
            let Some((col, q)) = pivot else {
                return Err(SimError::SingularMatrix);
            };
            self.rows[col].is_const = true;
            self.rows[col].value = (self.z[row] + rs_add) / q;
            self.rows[row].drop_row = true;
            row = 0;
        }

        let mut new_size = 0;
        for info in &mut self.rows {
            if info.is_const {
                info.map_col = None;
            } else {
                info.map_col = Some(new_size);
                new_size += 1;
            }
        }

        let mut a = vec![0.0; new_size * new_size];
        let mut z = vec![0.0; new_size];
        let mut next = 0;
        for r in 0..n {
            if self.rows[r].drop_row {
                self.rows[r].map_row = None;
                continue;
            }
            self.rows[r].map_row = Some(next);
            z[next] = self.z[r];
            for c in 0..n {
                let info = self.rows[c];
                let q = self.a[r * n + c];
                match info.map_col {
                    Some(mc) if !info.is_const => a[next * new_size + mc] += q,
                    _ => z[next] -= info.value * q,
                }
            }
            next += 1;
        }
        if next != new_size {
            return Err(SimError::SingularMatrix);
        }

        log::debug!(
            "simplified MNA system from {} to {} unknowns",
            self.full_size,
            new_size
        );

        self.size = new_size;
        self.orig_a = a.clone();
        self.orig_z = z.clone();
        self.a = a;
        self.z = z;
        self.lu = vec![0.0; new_size * new_size];
        self.pivots = vec![0; new_size];
        self.x = vec![0.0; new_size];
        self.mapped = true;
        Ok(())
    }

    /// Restore the linear snapshot taken by [`simplify`](Self::simplify).
    pub fn restore(&mut self) {
        self.a.copy_from_slice(&self.orig_a);
        self.z.copy_from_slice(&self.orig_z);
    }

    /// Fail on the first NaN or infinite matrix entry.
    pub fn check_finite(&self) -> Result<()> {
        match self.a.iter().position(|v| !v.is_finite()) {
            Some(pos) => Err(SimError::MatrixNotFinite {
                row: pos / self.size.max(1),
                col: pos % self.size.max(1),
            }),
            None => Ok(()),
        }
    }

    /// Perform LU decomposition with partial pivoting.
    pub fn factor(&mut self) -> Result<()> {
        let n = self.size;

        // A row of zeros can never be pivoted away
        for i in 0..n {
            if self.a[i * n..(i + 1) * n].iter().all(|&v| v == 0.0) {
                return Err(SimError::SingularMatrix);
            }
        }

        self.lu.copy_from_slice(&self.a);

        for i in 0..n {
            self.pivots[i] = i;
        }

        for k in 0..n {
            // Find pivot
            let mut max_val = self.lu[k * n + k].abs();
            let mut max_row = k;

            for i in (k + 1)..n {
                let val = self.lu[i * n + k].abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }

            if max_val == 0.0 || !max_val.is_finite() {
                return Err(SimError::SingularMatrix);
            }

            // Swap rows if needed
            if max_row != k {
                self.pivots.swap(k, max_row);
                for j in 0..n {
                    self.lu.swap(k * n + j, max_row * n + j);
                }
            }

            // Eliminate
            let pivot = self.lu[k * n + k];
            for i in (k + 1)..n {
                let factor = self.lu[i * n + k] / pivot;
                self.lu[i * n + k] = factor;
                if factor == 0.0 {
                    continue;
                }
                for j in (k + 1)..n {
                    self.lu[i * n + j] -= factor * self.lu[k * n + j];
                }
            }
        }

        Ok(())
    }

    /// Solve the system using the pre-computed LU decomposition.
    pub fn solve(&mut self) {
        let n = self.size;

        // Apply pivot permutation to z
        for i in 0..n {
            self.x[i] = self.z[self.pivots[i]];
        }

        // Forward substitution (L * y = Pb)
        for i in 0..n {
            for j in 0..i {
                self.x[i] -= self.lu[i * n + j] * self.x[j];
            }
        }

        // Back substitution (U * x = y)
        for i in (0..n).rev() {
            for j in (i + 1)..n {
                self.x[i] -= self.lu[i * n + j] * self.x[j];
            }
            self.x[i] /= self.lu[i * n + i];
        }
    }

    /// Value of a full-system unknown after the last solve.
    pub fn value(&self, full: usize) -> f64 {
        let info = &self.rows[full];
        if info.is_const {
            return info.value;
        }
        match info.map_col {
            Some(col) => self.x[col],
            None => info.value,
        }
    }

    /// Distribute the last solve into node voltages and branch currents.
    pub fn write_solution(&self, solution: &mut Solution) -> Result<()> {
        let node_unknowns = self.num_nodes.saturating_sub(1);
        for index in 0..self.full_size {
            let value = self.value(index);
            if !value.is_finite() {
                return Err(SimError::SolutionNotFinite { index });
            }
            if index < node_unknowns {
                solution.set_voltage(NodeId(index + 1), value);
            } else {
                solution.set_branch_current(BranchId(index - node_unknowns), value);
            }
        }
        Ok(())
    }
}
