//! The Flag object itself: typed state behind one mutex, dependency
//! semantics (I3/I4), and the mutators that drive the Storage Registry.
//!
//! Per Design Notes §9, a Flag never owns its Engine -- it holds a [`Weak`]
//! handle, upgraded on demand. This avoids the cyclic-reference problem that
//! would otherwise arise from "Flag calls back into Engine to cascade-disable
//! dependents".

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use super::status::FlagStatus;
use super::variant::{self, Variant};
use crate::context::{ContextSource, EvalContext};
use crate::engine::EngineInner;
use crate::error::{FlagError, FlagValueError};
use crate::targeting::{self, MatchOutcome, TargetingMap};
use crate::value::{FlagType, FlagValue};

/// The mutable projection of a flag's attributes (§3). This is the shape
/// that gets serialized to and read back from the Storage Registry.
#[derive(Debug, Clone)]
pub struct FlagState {
    pub status: FlagStatus,
    pub default_value: FlagValue,
    pub value: FlagValue,
    pub description: Option<String>,
    pub display_name: Option<String>,
    pub group: Option<String>,
    pub dependencies: Vec<String>,
    pub targeting: TargetingMap,
    pub variants: Vec<Variant>,
}

/// Options supplied to [`crate::engine::Engine::register`].
#[derive(Debug, Clone)]
pub struct FlagOptions {
    pub flag_type: FlagType,
    pub status: FlagStatus,
    pub default_value: FlagValue,
    pub description: Option<String>,
    pub display_name: Option<String>,
    pub group: Option<String>,
    pub dependencies: Vec<String>,
    pub variants: Vec<Variant>,
}

impl FlagOptions {
    #[must_use]
    pub fn new(flag_type: FlagType) -> Self {
        Self {
            flag_type,
            status: FlagStatus::Active,
            default_value: FlagValue::off_value(flag_type),
            description: None,
            display_name: None,
            group: None,
            dependencies: Vec::new(),
            variants: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_default(mut self, default_value: FlagValue) -> Self {
        self.default_value = default_value;
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// A registered flag. Cheap to clone (`Arc`-backed internally through the
/// Engine's registry); evaluation paths never allocate beyond a state clone.
pub struct Flag {
    name: String,
    flag_type: FlagType,
    state: RwLock<FlagState>,
    engine: Weak<EngineInner>,
}

impl Flag {
    pub(crate) fn new(name: String, opts: FlagOptions, engine: Weak<EngineInner>) -> Self {
        Self {
            name,
            flag_type: opts.flag_type,
            state: RwLock::new(FlagState {
                status: opts.status,
                default_value: opts.default_value.clone(),
                value: opts.default_value,
                description: opts.description,
                display_name: opts.display_name,
                group: opts.group,
                dependencies: opts.dependencies,
                targeting: TargetingMap::default(),
                variants: opts.variants,
            }),
            engine,
        }
    }

    pub(crate) fn from_state(name: String, flag_type: FlagType, state: FlagState, engine: Weak<EngineInner>) -> Self {
        Self {
            name,
            flag_type,
            state: RwLock::new(state),
            engine,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn flag_type(&self) -> FlagType {
        self.flag_type
    }

    #[must_use]
    pub fn status(&self) -> FlagStatus {
        self.state.read().status
    }

    /// Read-only view of the targeting rules (Design Notes §9: no direct
    /// private-field access).
    #[must_use]
    pub fn targeting(&self) -> TargetingMap {
        self.state.read().targeting.clone()
    }

    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        self.state.read().dependencies.clone()
    }

    #[must_use]
    pub fn default_value(&self) -> FlagValue {
        self.state.read().default_value.clone()
    }

    #[must_use]
    pub fn raw_value(&self) -> FlagValue {
        self.state.read().value.clone()
    }

    fn engine(&self) -> Option<Arc<EngineInner>> {
        self.engine.upgrade()
    }

    /// `enabled?(ctx)` (§4.7). Never panics or propagates; any internal
    /// failure is logged and treated as `false`.
    #[instrument(skip(self, ctx), fields(flag = %self.name))]
    #[must_use]
    pub fn enabled(&self, ctx: &EvalContext) -> bool {
        let state = self.state.read();

        if state.status == FlagStatus::Inactive {
            return false;
        }

        let would_be_enabled = self.would_be_enabled(&state, ctx);

        if state.status == FlagStatus::Deprecated && !ctx.allow_deprecated {
            if would_be_enabled {
                warn!(flag = %self.name, "deprecated flag suppressed to false for a caller without allow_deprecated");
            } else {
                debug!(flag = %self.name, "deprecated flag evaluated without allow_deprecated");
            }
            return false;
        }

        would_be_enabled
    }

    /// The targeting+value evaluation shared by the `Active` and
    /// `Deprecated` branches of `enabled` -- split out so the `Deprecated`
    /// suppression can inspect the would-be result without duplicating the
    /// targeting/value logic.
    fn would_be_enabled(&self, state: &FlagState, ctx: &EvalContext) -> bool {
        if !state.targeting.is_empty() {
            match targeting::evaluate(&self.name, &state.targeting, ctx) {
                MatchOutcome::NoMatch => return false,
                MatchOutcome::Match if self.flag_type == FlagType::Boolean => return true,
                MatchOutcome::Match | MatchOutcome::NoRules => {}
            }
        }
        state.value.is_truthy()
    }

    /// `value(ctx)` (§4.7): same targeting branch, but returns the stored
    /// value on `MATCH`/`NO_RULES` and `default_value` on `NO_MATCH`.
    #[must_use]
    pub fn value(&self, ctx: &EvalContext) -> FlagValue {
        let state = self.state.read();
        if state.targeting.is_empty() {
            return state.value.clone();
        }
        match targeting::evaluate(&self.name, &state.targeting, ctx) {
            MatchOutcome::Match | MatchOutcome::NoRules => state.value.clone(),
            MatchOutcome::NoMatch => state.default_value.clone(),
        }
    }

    /// `enabled_for?(obj, extra)`: derives a context from an arbitrary
    /// caller object, then evaluates [`Flag::enabled`].
    #[must_use]
    pub fn enabled_for(&self, source: &dyn ContextSource, extra: Option<&EvalContext>) -> bool {
        let ctx = EvalContext::from_source(source, extra);
        self.enabled(&ctx)
    }

    /// Weighted variant selection; `ctx` is accepted for API symmetry with
    /// the other evaluation entry points but does not affect the draw.
    #[must_use]
    pub fn get_variant(&self, _ctx: &EvalContext) -> Option<Variant> {
        let state = self.state.read();
        variant::select(&state.variants).cloned()
    }

    /// Finds a flag currently blocking `enable()` (I3): a flag `G` that
    /// lists this flag among its dependencies and is itself disabled.
    fn blocking_dependent(&self, engine: &EngineInner) -> Option<String> {
        let default_ctx = EvalContext::new();
        engine.flags.iter().find_map(|entry| {
            let other = entry.value();
            if other.name == self.name {
                return None;
            }
            if other.dependencies().iter().any(|dep| dep == &self.name) && !other.enabled(&default_ctx) {
                Some(other.name.clone())
            } else {
                None
            }
        })
    }

    /// `enable()` (§4.7, I3). Returns `Ok(false)` -- ambiguous with "not
    /// found" -- when blocked by a disabled dependent; see
    /// [`Flag::enable_checked`] for a variant that distinguishes the two.
    pub async fn enable(&self) -> Result<bool, FlagError> {
        match self.try_enable()? {
            EnableOutcome::Blocked(_) => Ok(false),
            EnableOutcome::Enabled => {
                self.persist().await?;
                Ok(true)
            }
        }
    }

    /// Same as [`Flag::enable`], but surfaces a
    /// [`crate::error::DependencyBlockedError`] instead of a bare `false`
    /// when blocked (§9 Open Questions).
    pub async fn enable_checked(&self) -> Result<(), FlagError> {
        match self.try_enable()? {
            EnableOutcome::Blocked(blocking_dependent) => Err(FlagError::DependencyBlocked(
                crate::error::DependencyBlockedError {
                    flag: self.name.clone(),
                    blocking_dependent,
                },
            )),
            EnableOutcome::Enabled => {
                self.persist().await?;
                Ok(())
            }
        }
    }

    fn try_enable(&self) -> Result<EnableOutcome, FlagError> {
        let on_value = FlagValue::on_value(self.flag_type)?;

        if let Some(engine) = self.engine() {
            if let Some(blocking) = self.blocking_dependent(&engine) {
                return Ok(EnableOutcome::Blocked(blocking));
            }
        }

        let mut state = self.state.write();
        state.targeting.clear();
        state.value = on_value;
        Ok(EnableOutcome::Enabled)
    }

    /// `disable()` (§4.7, I4): clears targeting, writes the off value, and
    /// cascades one level to every dependent flag.
    pub async fn disable(&self) -> Result<(), FlagError> {
        self.disable_without_cascade().await?;
        self.cascade_disable_dependents().await;
        Ok(())
    }

    async fn disable_without_cascade(&self) -> Result<(), FlagError> {
        {
            let mut state = self.state.write();
            state.targeting.clear();
            state.value = FlagValue::off_value(self.flag_type);
        }
        self.persist().await
    }

    async fn cascade_disable_dependents(&self) {
        let Some(engine) = self.engine() else { return };
        let dependents: Vec<Arc<Flag>> = engine
            .flags
            .iter()
            .filter(|entry| entry.value().dependencies().iter().any(|dep| dep == &self.name))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for dependent in dependents {
            if let Err(err) = dependent.disable_without_cascade().await {
                warn!(flag = %dependent.name, error = %err, "cascade disable failed");
            }
        }
    }

    /// `set_value(v)`: forbidden for the off/on shortcuts used by
    /// `enable`/`disable` (I2) -- this is the general-purpose mutator for
    /// any type.
    pub async fn set_value(&self, value: FlagValue) -> Result<(), FlagError> {
        value.validate(self.flag_type).map_err(|_| FlagValueError::TypeMismatch {
            name: self.name.clone(),
            expected: self.flag_type.as_str(),
            actual: value.flag_type().as_str(),
        })?;
        {
            let mut state = self.state.write();
            state.value = value;
        }
        self.persist().await
    }

    pub async fn enable_for_role(&self, role: impl Into<String>) -> Result<(), FlagError> {
        {
            let mut state = self.state.write();
            state.targeting.role.get_or_insert_with(Default::default).insert(role.into());
        }
        self.persist().await
    }

    pub async fn enable_for_user(&self, user_id: impl Into<String>) -> Result<(), FlagError> {
        {
            let mut state = self.state.write();
            state.targeting.user.get_or_insert_with(Default::default).insert(user_id.into());
        }
        self.persist().await
    }

    /// Percentage values `<= 0` clear the rule (treated as "disable this
    /// rule"); values `> 100` are rejected per §6's admin-façade contract.
    pub async fn enable_percentage_of_users(&self, percentage: f64) -> Result<(), FlagError> {
        if percentage > 100.0 {
            return Err(FlagValueError::TypeMismatch {
                name: self.name.clone(),
                expected: "percentage in (0, 100]",
                actual: "out of range",
            }
            .into());
        }
        {
            let mut state = self.state.write();
            state.targeting.percentage_users = (percentage > 0.0).then_some(percentage);
        }
        self.persist().await
    }

    pub async fn enable_percentage_of_requests(&self, percentage: f64) -> Result<(), FlagError> {
        if percentage > 100.0 {
            return Err(FlagValueError::TypeMismatch {
                name: self.name.clone(),
                expected: "percentage in (0, 100]",
                actual: "out of range",
            }
            .into());
        }
        {
            let mut state = self.state.write();
            state.targeting.percentage_requests = (percentage > 0.0).then_some(percentage);
        }
        self.persist().await
    }

    /// Forces a re-read of this flag's projection from storage (Engine's
    /// `reload`, and the invalidation subscriber's cache-drop handler).
    pub async fn reload(&self) -> Result<(), FlagError> {
        let Some(engine) = self.engine() else { return Ok(()) };
        if let Some(fresh) = engine.storage.read_flag(&self.name).await? {
            *self.state.write() = fresh;
        }
        Ok(())
    }

    async fn persist(&self) -> Result<(), FlagError> {
        let Some(engine) = self.engine() else { return Ok(()) };
        let snapshot = self.state.read().clone();
        engine.storage.write_flag(&self.name, &snapshot).await?;
        Ok(())
    }

    /// Serializes the current projection to the flat attribute map used by
    /// all three storage tiers (§4.1/§4.2/§4.3).
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let state = self.state.read();
        attributes_from_state(self.flag_type, &state)
    }
}

enum EnableOutcome {
    Blocked(String),
    Enabled,
}

/// Flattens a [`FlagState`] into the attribute-key map every storage tier
/// persists opaquely (§4.1's "callers must treat the store as opaque").
#[must_use]
pub fn attributes_from_state(flag_type: FlagType, state: &FlagState) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    attrs.insert("type".to_string(), flag_type.as_str().to_string());
    attrs.insert("status".to_string(), state.status.as_str().to_string());
    attrs.insert(
        "default_value".to_string(),
        serde_json::to_string(&state.default_value).unwrap_or_default(),
    );
    attrs.insert("value".to_string(), serde_json::to_string(&state.value).unwrap_or_default());
    if let Some(d) = &state.description {
        attrs.insert("description".to_string(), d.clone());
    }
    if let Some(d) = &state.display_name {
        attrs.insert("display_name".to_string(), d.clone());
    }
    if let Some(g) = &state.group {
        attrs.insert("group".to_string(), g.clone());
    }
    attrs.insert(
        "dependencies".to_string(),
        serde_json::to_string(&state.dependencies).unwrap_or_default(),
    );
    attrs.insert(
        "targeting".to_string(),
        serde_json::to_string(&state.targeting).unwrap_or_default(),
    );
    attrs.insert(
        "variants".to_string(),
        serde_json::to_string(&state.variants).unwrap_or_default(),
    );
    attrs
}

/// Inverse of [`attributes_from_state`].
///
/// # Errors
/// Returns an error if a required key is missing or fails to parse.
pub fn state_from_attributes(attrs: &HashMap<String, String>) -> Result<FlagState, FlagError> {
    let status = attrs
        .get("status")
        .and_then(|s| match s.as_str() {
            "active" => Some(FlagStatus::Active),
            "inactive" => Some(FlagStatus::Inactive),
            "deprecated" => Some(FlagStatus::Deprecated),
            _ => None,
        })
        .unwrap_or(FlagStatus::Active);

    let default_value = attrs
        .get("default_value")
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(FlagValue::Boolean(false));
    let value = attrs
        .get("value")
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_else(|| default_value.clone());
    let dependencies = attrs
        .get("dependencies")
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    let targeting = attrs
        .get("targeting")
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    let variants = attrs
        .get("variants")
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();

    Ok(FlagState {
        status,
        default_value,
        value,
        description: attrs.get("description").cloned(),
        display_name: attrs.get("display_name").cloned(),
        group: attrs.get("group").cloned(),
        dependencies,
        targeting,
        variants,
    })
}
