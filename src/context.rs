//! Per-evaluation context and the capability-based extraction path.
//!
//! Design Notes §9 replaces reflective attribute lookup on arbitrary caller
//! objects with two explicit paths: a plain mapping, or a small capability
//! interface (`ContextSource`) that callers implement on their own domain
//! types. There is no dynamic/reflective third path.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::value::FlagValue;

/// Per-evaluation caller-supplied attributes.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub user_id: Option<String>,
    pub group: Option<String>,
    pub role: Option<String>,
    pub tags: Vec<String>,
    pub ip_address: Option<IpAddr>,
    /// Set by a caller that has explicitly opted into seeing deprecated
    /// flags evaluate rather than being forced to `false`.
    pub allow_deprecated: bool,
    /// Arbitrary keys matched by `custom_attributes` targeting rules.
    pub custom: HashMap<String, FlagValue>,
}

impl EvalContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_ip_address(mut self, ip: IpAddr) -> Self {
        self.ip_address = Some(ip);
        self
    }

    #[must_use]
    pub fn allowing_deprecated(mut self) -> Self {
        self.allow_deprecated = true;
        self
    }

    #[must_use]
    pub fn with_custom(mut self, key: impl Into<String>, value: FlagValue) -> Self {
        self.custom.insert(key.into(), value);
        self
    }

    /// Builds a context from a plain mapping, as described in §4.7's
    /// `enabled_for?` contract: recognized keys are pulled out by name,
    /// everything else becomes a custom attribute.
    #[must_use]
    pub fn from_map(map: &HashMap<String, FlagValue>) -> Self {
        let mut ctx = EvalContext::new();
        for (key, value) in map {
            match key.as_str() {
                "id" | "user_id" => ctx.user_id = Some(value.stringify()),
                "group" => ctx.group = Some(value.stringify()),
                "role" => ctx.role = Some(value.stringify()),
                "ip_address" => ctx.ip_address = value.stringify().parse().ok(),
                "tags" | "tag_ids" | "tag_names" => {
                    ctx.tags = value
                        .stringify()
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "allow_deprecated" => ctx.allow_deprecated = value.is_truthy(),
                _ => {
                    ctx.custom.insert(key.clone(), value.clone());
                }
            }
        }
        ctx
    }

    /// Builds a context from anything implementing [`ContextSource`], then
    /// merges `extra` over it (extra wins), per §4.7.
    #[must_use]
    pub fn from_source(source: &dyn ContextSource, extra: Option<&EvalContext>) -> Self {
        let mut ctx = EvalContext {
            user_id: source.user_id(),
            group: source.group(),
            role: source.role(),
            tags: source.tags(),
            ip_address: source.ip_address(),
            allow_deprecated: false,
            custom: HashMap::new(),
        };
        if let Some(extra) = extra {
            ctx.merge_over(extra);
        }
        ctx
    }

    /// Overlays `other`'s present fields onto `self` ("extra wins").
    pub fn merge_over(&mut self, other: &EvalContext) {
        if other.user_id.is_some() {
            self.user_id = other.user_id.clone();
        }
        if other.group.is_some() {
            self.group = other.group.clone();
        }
        if other.role.is_some() {
            self.role = other.role.clone();
        }
        if !other.tags.is_empty() {
            self.tags = other.tags.clone();
        }
        if other.ip_address.is_some() {
            self.ip_address = other.ip_address;
        }
        if other.allow_deprecated {
            self.allow_deprecated = true;
        }
        for (k, v) in &other.custom {
            self.custom.insert(k.clone(), v.clone());
        }
    }
}

/// Explicit capability interface a caller's domain type can implement so
/// `Engine::enabled_for` can derive an [`EvalContext`] from it without
/// reflection. All methods have defaults of `None`/empty so implementers
/// only override what they actually have.
pub trait ContextSource {
    fn user_id(&self) -> Option<String> {
        None
    }
    fn group(&self) -> Option<String> {
        None
    }
    fn role(&self) -> Option<String> {
        None
    }
    fn ip_address(&self) -> Option<IpAddr> {
        None
    }
    /// Tags, normalized to an ordered sequence of strings. Implementers
    /// whose tag elements expose an id should return the id.
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A bare integer-like value (e.g. a raw user id) is treated as `user_id`.
impl ContextSource for u64 {
    fn user_id(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl ContextSource for i64 {
    fn user_id(&self) -> Option<String> {
        Some(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeUser {
        id: u64,
        role: &'static str,
        tags: Vec<&'static str>,
    }

    impl ContextSource for FakeUser {
        fn user_id(&self) -> Option<String> {
            Some(self.id.to_string())
        }
        fn role(&self) -> Option<String> {
            Some(self.role.to_string())
        }
        fn tags(&self) -> Vec<String> {
            self.tags.iter().map(|s| s.to_string()).collect()
        }
    }

    #[test]
    fn from_map_extracts_recognized_keys() {
        let mut map = HashMap::new();
        map.insert("user_id".to_string(), FlagValue::String("42".to_string()));
        map.insert("role".to_string(), FlagValue::String("admin".to_string()));
        map.insert(
            "plan".to_string(),
            FlagValue::String("enterprise".to_string()),
        );

        let ctx = EvalContext::from_map(&map);
        assert_eq!(ctx.user_id.as_deref(), Some("42"));
        assert_eq!(ctx.role.as_deref(), Some("admin"));
        assert_eq!(
            ctx.custom.get("plan"),
            Some(&FlagValue::String("enterprise".to_string()))
        );
    }

    #[test]
    fn from_source_derives_context() {
        let user = FakeUser {
            id: 7,
            role: "user",
            tags: vec!["beta", "vip"],
        };
        let ctx = EvalContext::from_source(&user, None);
        assert_eq!(ctx.user_id.as_deref(), Some("7"));
        assert_eq!(ctx.role.as_deref(), Some("user"));
        assert_eq!(ctx.tags, vec!["beta", "vip"]);
    }

    #[test]
    fn extra_wins_over_derived_context() {
        let user = FakeUser {
            id: 7,
            role: "user",
            tags: vec![],
        };
        let extra = EvalContext::new().with_role("admin");
        let ctx = EvalContext::from_source(&user, Some(&extra));
        assert_eq!(ctx.user_id.as_deref(), Some("7"));
        assert_eq!(ctx.role.as_deref(), Some("admin"));
    }

    #[test]
    fn scalar_integer_is_treated_as_user_id() {
        let ctx = EvalContext::from_source(&42u64, None);
        assert_eq!(ctx.user_id.as_deref(), Some("42"));
    }

    #[test]
    fn builder_methods_compose() {
        let ctx = EvalContext::new()
            .with_user_id("u1")
            .with_group("g1")
            .with_tags(["a", "b"])
            .allowing_deprecated();
        assert_eq!(ctx.user_id.as_deref(), Some("u1"));
        assert_eq!(ctx.group.as_deref(), Some("g1"));
        assert_eq!(ctx.tags, vec!["a", "b"]);
        assert!(ctx.allow_deprecated);
    }
}
