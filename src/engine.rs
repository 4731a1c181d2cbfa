//! Top-level `Engine`: binds a `Dialect`, `Target`, and `Plan` together and
//! exposes the operations the CLI (A1) drives (spec.md §2 control flow: CLI
//! → select Target → factory(C12) → ensure registry(C7) → reconcile(C10) →
//! executor(C9) per change → query(C11)).

use std::cell::Cell;

use crate::change::Change;
use crate::connection::Connection;
use crate::dialect::{self, Dialect};
use crate::error::Result;
use crate::executor;
use crate::plan::Plan;
use crate::query::{self, CurrentState, EventFilter, EventRecord};
use crate::reconciler::{self, DeployedChange, Mode};
use crate::registry;
use crate::target::Target;

/// Bundles the per-target `Dialect`, `Target`, and in-memory `Plan` (spec.md
/// §9's engine factory, C12) plus a registry-bootstrap memo so repeated
/// operations against the same target don't re-probe `projects` every time
/// (spec.md §4.6 "idempotent").
pub struct Engine {
    dialect: Box<dyn Dialect>,
    target: Target,
    plan: Plan,
    registry_ready: Cell<bool>,
}

impl Engine {
    /// Build an `Engine` for `target`'s engine tag (spec.md §4.11 C12
    /// dispatch).
    pub fn new(target: Target, plan: Plan) -> Result<Self> {
        let dialect = dialect::dialect_for(target.engine_tag)?;
        Ok(Self {
            dialect,
            target,
            plan,
            registry_ready: Cell::new(false),
        })
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    fn namespace(&self) -> Option<String> {
        self.target.registry_namespace()
    }

    /// Ensure the registry exists for this target, memoized for the
    /// `Engine`'s lifetime (spec.md §4.6 C7).
    pub fn ensure_registry(&self) -> Result<()> {
        if self.registry_ready.get() {
            return Ok(());
        }
        let mut conn = self.dialect.create_connection(&self.target.driver_uri)?;
        for stmt in self.dialect.session_init_statements(self.namespace().as_deref()) {
            conn.execute(&stmt, &[])?;
        }
        registry::ensure_registry(self.dialect.as_ref(), conn.as_mut(), &self.target, &self.plan)?;
        conn.close()?;
        self.registry_ready.set(true);
        Ok(())
    }

    /// Rows of `deployed_ids()` for this engine's project (spec.md §4.9).
    pub fn deployed(&self) -> Result<Vec<DeployedChange>> {
        self.ensure_registry()?;
        let mut conn = self.dialect.create_connection(&self.target.driver_uri)?;
        for stmt in self.dialect.session_init_statements(self.namespace().as_deref()) {
            conn.execute(&stmt, &[])?;
        }
        let rows = reconciler::deployed_ids(
            self.dialect.as_ref(),
            conn.as_mut(),
            self.namespace().as_deref(),
            self.plan.project_name(),
            &self.plan,
        )?;
        conn.close()?;
        Ok(rows)
    }

    /// `deploy_plan` against this engine's current deployed set (spec.md
    /// §4.9).
    pub fn changes_to_deploy(&self, to_change: Option<&str>, mode: Mode) -> Result<Vec<Change>> {
        let deployed = self.deployed()?;
        reconciler::deploy_plan(&self.plan, &deployed, to_change, mode)
    }

    /// `revert_plan` against this engine's current deployed set (spec.md
    /// §4.9).
    pub fn changes_to_revert(&self, to_change: Option<&str>) -> Result<Vec<Change>> {
        let deployed = self.deployed()?;
        reconciler::revert_plan(&self.plan, &deployed, to_change)
    }

    /// The last change both plan and registry agree on (spec.md §4.9
    /// "Common-ancestor detection").
    pub fn common_ancestor(&self) -> Result<Option<Change>> {
        let deployed = self.deployed()?;
        reconciler::common_ancestor(&self.plan, &deployed)
    }

    /// Deploy every pending change up to `to_change`/`mode`, stopping at the
    /// first failure (spec.md §2 "Any failure aborts the current change's
    /// transaction; already-committed prior changes remain applied").
    pub fn deploy_plan(&self, to_change: Option<&str>, mode: Mode) -> Result<Vec<String>> {
        self.ensure_registry()?;
        let pending = self.changes_to_deploy(to_change, mode)?;
        let mut deployed_names = Vec::with_capacity(pending.len());
        for change in &pending {
            self.deploy_change(change)?;
            deployed_names.push(change.name.clone());
        }
        Ok(deployed_names)
    }

    /// Revert every change up to `to_change`, newest-first, stopping at the
    /// first failure.
    pub fn revert_plan(&self, to_change: Option<&str>) -> Result<Vec<String>> {
        self.ensure_registry()?;
        let pending = self.changes_to_revert(to_change)?;
        let mut reverted_names = Vec::with_capacity(pending.len());
        for change in &pending {
            self.revert_change(change)?;
            reverted_names.push(change.name.clone());
        }
        Ok(reverted_names)
    }

    pub fn deploy_change(&self, change: &Change) -> Result<()> {
        self.ensure_registry()?;
        executor::deploy_change(self.dialect.as_ref(), &self.target, &self.plan, change)
    }

    pub fn revert_change(&self, change: &Change) -> Result<()> {
        self.ensure_registry()?;
        executor::revert_change(self.dialect.as_ref(), &self.target, &self.plan, change)
    }

    #[must_use]
    pub fn verify_change(&self, change: &Change) -> bool {
        executor::verify_change(self.dialect.as_ref(), &self.target, change)
    }

    /// Verify every deployed change, in plan order; returns the names that
    /// failed verification (spec.md §4.8, never raises).
    pub fn verify_all(&self) -> Result<Vec<String>> {
        let deployed = self.deployed()?;
        let mut failed = Vec::new();
        for deployed_change in &deployed {
            if let Some(change) = self.plan.by_id(&deployed_change.id) {
                if !self.verify_change(change) {
                    failed.push(change.name.clone());
                }
            }
        }
        Ok(failed)
    }

    /// Attach `tag_name` to a deployed `change` (the CLI's standalone `tag`
    /// command; spec.md §6, SPEC_FULL §4.14-adjacent supplemental
    /// grounding in `recorder::record_tag`).
    pub fn tag_change(&self, change: &Change, tag_name: &str) -> Result<()> {
        self.ensure_registry()?;
        let mut conn = self.dialect.create_connection(&self.target.driver_uri)?;
        for stmt in self.dialect.session_init_statements(self.namespace().as_deref()) {
            conn.execute(&stmt, &[])?;
        }
        let result = crate::transaction::with_transaction(
            self.dialect.as_ref(),
            conn.as_mut(),
            self.namespace().as_deref(),
            "tag",
            Some(&change.name),
            |c| crate::recorder::record_tag(self.dialect.as_ref(), c, self.namespace().as_deref(), self.plan.project_name(), change, tag_name),
        );
        conn.close()?;
        result
    }

    pub fn search_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>> {
        self.ensure_registry()?;
        let mut conn = self.dialect.create_connection(&self.target.driver_uri)?;
        for stmt in self.dialect.session_init_statements(self.namespace().as_deref()) {
            conn.execute(&stmt, &[])?;
        }
        let result = query::search_events(self.dialect.as_ref(), conn.as_mut(), self.namespace().as_deref(), filter);
        conn.close()?;
        result
    }

    pub fn current_state(&self) -> Result<Option<CurrentState>> {
        self.ensure_registry()?;
        let mut conn = self.dialect.create_connection(&self.target.driver_uri)?;
        for stmt in self.dialect.session_init_statements(self.namespace().as_deref()) {
            conn.execute(&stmt, &[])?;
        }
        let result = query::current_state(
            self.dialect.as_ref(),
            conn.as_mut(),
            self.namespace().as_deref(),
            Some(self.plan.project_name()),
        );
        conn.close()?;
        result
    }

    pub fn current_changes(&self) -> Result<Vec<CurrentState>> {
        self.ensure_registry()?;
        let mut conn = self.dialect.create_connection(&self.target.driver_uri)?;
        for stmt in self.dialect.session_init_statements(self.namespace().as_deref()) {
            conn.execute(&stmt, &[])?;
        }
        let result = query::current_changes(
            self.dialect.as_ref(),
            conn.as_mut(),
            self.namespace().as_deref(),
            Some(self.plan.project_name()),
        );
        conn.close()?;
        result
    }
}
