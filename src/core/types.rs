use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CellStatus {
    Converged,
    IterationLimit,
    Infeasible,
    NumericalFailure,
}

impl CellStatus {
    pub fn is_converged(self) -> bool {
        self == CellStatus::Converged
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeSolution {
    pub age: u32,
    pub consumption_rate: Vec<f64>,
    pub equity_share: Vec<f64>,
    pub value: Vec<f64>,
    pub status: Vec<CellStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSolution {
    pub wealth_grid: Vec<f64>,
    /// One row per age, ascending.
    pub rows: Vec<AgeSolution>,
    pub diagnostics: SolveDiagnostics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveDiagnostics {
    pub cells: usize,
    pub converged: usize,
    pub iteration_limit: usize,
    pub infeasible: usize,
    pub numerical_failure: usize,
}

impl SolveDiagnostics {
    pub fn from_rows(rows: &[AgeSolution]) -> Self {
        let mut out = Self::default();
        for status in rows.iter().flat_map(|row| row.status.iter()) {
            out.cells += 1;
            match status {
                CellStatus::Converged => out.converged += 1,
                CellStatus::IterationLimit => out.iteration_limit += 1,
                CellStatus::Infeasible => out.infeasible += 1,
                CellStatus::NumericalFailure => out.numerical_failure += 1,
            }
        }
        out
    }

    pub fn all_converged(&self) -> bool {
        self.converged == self.cells
    }
}

impl LifecycleSolution {
    pub fn new(wealth_grid: Vec<f64>, rows: Vec<AgeSolution>) -> Self {
        let diagnostics = SolveDiagnostics::from_rows(&rows);
        Self {
            wealth_grid,
            rows,
            diagnostics,
        }
    }

    pub fn start_age(&self) -> Option<u32> {
        self.rows.first().map(|row| row.age)
    }

    pub fn end_age(&self) -> Option<u32> {
        self.rows.last().map(|row| row.age)
    }

    pub fn row(&self, age: u32) -> Option<&AgeSolution> {
        let start = self.start_age()?;
        let idx = age.checked_sub(start)? as usize;
        self.rows.get(idx).filter(|row| row.age == age)
    }

    pub fn consumption_table(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.consumption_rate.clone()).collect()
    }

    pub fn equity_table(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.equity_share.clone()).collect()
    }

    pub fn value_table(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.value.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationYearResult {
    pub age: u32,
    pub alive_fraction: f64,
    pub median_wealth: f64,
    pub p10_wealth: f64,
    pub p90_wealth: f64,
    pub median_consumption: f64,
    pub median_equity_share: f64,
}
