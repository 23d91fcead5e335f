//! The middleware kernel: global stages, groups, aliases, and priority.
//!
//! A [`Kernel`] is built once at startup, validated in full, and then only
//! read. [`Kernel::bind`] walks a [`Router`] and composes one chain per route;
//! after that no middleware name is ever looked up again.
//!
//! Composition for a route that asks for some groups and some stages:
//!
//! 1. the global stages, in declared order;
//! 2. each requested group's members, groups first in the order the route
//!    lists them;
//! 3. the route's own stages;
//! 4. steps 2–3 reordered by the priority list. Prioritized stages swap
//!    among the slots they already occupy and everything else stays put.
//!    A prioritized stage may not be global, so the list orders every pair
//!    of prioritized stages a chain can contain;
//! 5. duplicates dropped, first occurrence wins. Identity is the stage id
//!    plus its argument, so `throttle:api` and `throttle:60,1` both stay.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use matchit::Router as MatchitRouter;
use tracing::{debug, info};

use crate::app::{App, Endpoint};
use crate::error::ConfigError;
use crate::handler::{BoxFuture, BoxedHandler};
use crate::manifest::Manifest;
use crate::middleware::{BoxedMiddleware, Next};
use crate::registry::Registry;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::stage_ref::StageRef;

// ── Chain ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Resolved {
    id: String,
    argument: Option<String>,
    stage: BoxedMiddleware,
}

impl Resolved {
    fn label(&self) -> String {
        match &self.argument {
            Some(arg) => format!("{}:{arg}", self.id),
            None => self.id.clone(),
        }
    }
}

/// A composed, ready-to-run middleware chain.
///
/// [`labels`](Chain::labels) lists the stages in execution order as
/// `id` or `id:argument`.
#[derive(Clone)]
pub struct Chain {
    stages: Arc<[BoxedMiddleware]>,
    labels: Arc<[String]>,
}

impl Chain {
    fn new(resolved: Vec<Resolved>) -> Self {
        let labels = resolved.iter().map(Resolved::label).collect();
        let stages = resolved.into_iter().map(|r| r.stage).collect();
        Self { stages, labels }
    }

    pub fn labels(&self) -> &[String] { &self.labels }
    pub fn len(&self) -> usize { self.stages.len() }
    pub fn is_empty(&self) -> bool { self.stages.is_empty() }

    /// Runs the chain with `handler` as its terminal.
    pub fn run(&self, req: Request, handler: BoxedHandler) -> BoxFuture<'static, Response> {
        Next::new(Arc::clone(&self.stages), handler).run(req)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.labels.iter()).finish()
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Code-first alternative to a [`Manifest`].
///
/// ```rust
/// use strata::{Kernel, Registry};
/// use strata::middleware::trace::TraceRequests;
///
/// let kernel = Kernel::builder(Registry::new().stage("http.trace", TraceRequests))
///     .global(["http.trace"])
///     .group("api", ["http.trace"])
///     .build()
///     .expect("valid kernel");
/// # let _ = kernel;
/// ```
pub struct KernelBuilder {
    registry: Registry,
    global: Vec<String>,
    groups: Vec<(String, Vec<String>)>,
    aliases: Vec<(String, String)>,
    priority: Vec<String>,
}

impl KernelBuilder {
    /// Appends to the global stage list.
    pub fn global<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn group<I, S>(mut self, name: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups
            .push((name.to_owned(), members.into_iter().map(Into::into).collect()));
        self
    }

    pub fn alias(mut self, alias: &str, id: &str) -> Self {
        self.aliases.push((alias.to_owned(), id.to_owned()));
        self
    }

    /// Appends to the priority list.
    pub fn priority<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.priority.extend(names.into_iter().map(Into::into));
        self
    }

    /// Validates everything and instantiates every global and group stage.
    pub fn build(self) -> Result<Kernel, ConfigError> {
        self.registry.check()?;

        let mut aliases = HashMap::new();
        for (alias, id) in self.aliases {
            let invalid = |reason: String| ConfigError::InvalidAlias { alias: alias.clone(), reason };
            if alias.is_empty() || alias.contains(crate::stage_ref::ARGUMENT_DELIMITER) {
                return Err(invalid("alias names may not be empty or contain `:`".to_owned()));
            }
            if !self.registry.contains(&id) {
                return Err(invalid(format!("points at unregistered stage `{id}`")));
            }
            if self.registry.contains(&alias) && alias != id {
                return Err(invalid("shadows a registered stage id".to_owned()));
            }
            if aliases.contains_key(&alias) {
                return Err(invalid("defined more than once".to_owned()));
            }
            aliases.insert(alias, id);
        }

        let mut raw_groups = HashMap::new();
        for (name, members) in self.groups {
            if raw_groups.contains_key(&name)
                || aliases.contains_key(&name)
                || self.registry.contains(&name)
            {
                return Err(ConfigError::DuplicateGroup { group: name });
            }
            let members = members
                .iter()
                .map(|m| StageRef::parse(m))
                .collect::<Result<Vec<_>, _>>()?;
            raw_groups.insert(name, members);
        }

        let mut priority = HashMap::new();
        for entry in &self.priority {
            let reference = StageRef::parse(entry)?;
            let id = resolve_id(&self.registry, &aliases, reference.name())
                .ok_or_else(|| ConfigError::UnknownStage { name: reference.name().to_owned() })?;
            let rank = priority.len();
            if priority.insert(id.to_owned(), rank).is_some() {
                return Err(ConfigError::DuplicatePriority { id: id.to_owned() });
            }
        }

        let mut kernel = Kernel {
            registry: self.registry,
            aliases,
            raw_groups,
            groups: HashMap::new(),
            global: Vec::new(),
            priority,
        };

        let names: Vec<String> = kernel.raw_groups.keys().cloned().collect();
        for name in names {
            let mut visiting = Vec::new();
            kernel.expand_group(&name, &mut visiting)?;
        }

        let mut global = Vec::new();
        for entry in &self.global {
            kernel.resolve_into(&StageRef::parse(entry)?, &mut global)?;
        }
        kernel.global = dedup(global);
        if let Some(stage) = kernel.global.iter().find(|r| kernel.priority.contains_key(&r.id)) {
            return Err(ConfigError::PrioritizedGlobal { id: stage.id.clone() });
        }

        info!(
            global = kernel.global.len(),
            groups = kernel.groups.len(),
            aliases = kernel.aliases.len(),
            priority = kernel.priority.len(),
            "middleware kernel ready"
        );
        Ok(kernel)
    }
}

// ── Kernel ────────────────────────────────────────────────────────────────────

/// Immutable middleware configuration. See the [module docs](self).
pub struct Kernel {
    registry: Registry,
    aliases: HashMap<String, String>,
    raw_groups: HashMap<String, Vec<StageRef>>,
    groups: HashMap<String, Vec<Resolved>>,
    global: Vec<Resolved>,
    priority: HashMap<String, usize>,
}

impl Kernel {
    pub fn builder(registry: Registry) -> KernelBuilder {
        KernelBuilder {
            registry,
            global: Vec::new(),
            groups: Vec::new(),
            aliases: Vec::new(),
            priority: Vec::new(),
        }
    }

    pub fn from_manifest(manifest: Manifest, registry: Registry) -> Result<Self, ConfigError> {
        let mut builder = Self::builder(registry)
            .global(manifest.global)
            .priority(manifest.priority);
        for (alias, id) in &manifest.aliases {
            builder = builder.alias(alias, id);
        }
        for (name, members) in manifest.groups {
            builder = builder.group(&name, members);
        }
        builder.build()
    }

    /// The chain every request runs, routed or not.
    pub fn global_chain(&self) -> Chain {
        Chain::new(self.global.clone())
    }

    /// Composes the chain for a route that asks for `names` (group names,
    /// aliases, or stage ids, optionally with `:argument`).
    pub fn compose<I, S>(&self, names: I) -> Result<Chain, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut groups = Vec::new();
        let mut stages = Vec::new();
        for name in names {
            let reference = StageRef::parse(name.as_ref())?;
            if self.groups.contains_key(reference.name()) {
                groups.push(reference);
            } else {
                stages.push(reference);
            }
        }

        let mut tail = Vec::new();
        for reference in groups.iter().chain(&stages) {
            self.resolve_into(reference, &mut tail)?;
        }
        self.sort_by_priority(&mut tail);

        let mut chain = self.global.clone();
        chain.extend(tail);
        Ok(Chain::new(dedup(chain)))
    }

    /// Composes every route of `router` into an [`App`].
    ///
    /// Any unresolvable name or invalid path aborts the whole bind; a process
    /// should not start serving with half its routes.
    pub fn bind(&self, router: Router) -> Result<App, ConfigError> {
        let mut routes: HashMap<http::Method, MatchitRouter<Endpoint>> = HashMap::new();
        let mut count = 0usize;

        for route in router.into_routes() {
            let chain = self.compose(&route.middleware)?;
            debug!(method = %route.method, path = %route.path, chain = ?chain, "route composed");
            routes
                .entry(route.method)
                .or_default()
                .insert(route.path.clone(), Endpoint { chain, handler: route.handler })
                .map_err(|source| ConfigError::Route { path: route.path, source })?;
            count += 1;
        }

        info!(routes = count, "routes bound");
        Ok(App::new(routes, self.global_chain()))
    }

    fn expand_group(
        &mut self,
        name: &str,
        visiting: &mut Vec<String>,
    ) -> Result<Vec<Resolved>, ConfigError> {
        if let Some(done) = self.groups.get(name) {
            return Ok(done.clone());
        }
        if visiting.iter().any(|g| g == name) {
            return Err(ConfigError::GroupCycle { group: name.to_owned() });
        }
        visiting.push(name.to_owned());

        let members = self.raw_groups.get(name).cloned().unwrap_or_default();
        let mut resolved = Vec::new();
        for member in &members {
            if self.raw_groups.contains_key(member.name()) {
                if member.argument().is_some() {
                    return Err(group_with_argument(member));
                }
                resolved.extend(self.expand_group(member.name(), visiting)?);
            } else {
                resolved.push(self.instantiate(member)?);
            }
        }

        visiting.pop();
        self.groups.insert(name.to_owned(), resolved.clone());
        Ok(resolved)
    }

    fn resolve_into(&self, reference: &StageRef, out: &mut Vec<Resolved>) -> Result<(), ConfigError> {
        match self.groups.get(reference.name()) {
            Some(_) if reference.argument().is_some() => Err(group_with_argument(reference)),
            Some(members) => {
                out.extend(members.iter().cloned());
                Ok(())
            }
            None => {
                out.push(self.instantiate(reference)?);
                Ok(())
            }
        }
    }

    fn instantiate(&self, reference: &StageRef) -> Result<Resolved, ConfigError> {
        let id = resolve_id(&self.registry, &self.aliases, reference.name())
            .ok_or_else(|| ConfigError::UnknownStage { name: reference.name().to_owned() })?;
        let stage = self.registry.instantiate(id, reference.argument())?;
        Ok(Resolved {
            id: id.to_owned(),
            argument: reference.argument().map(str::to_owned),
            stage,
        })
    }

    fn sort_by_priority(&self, tail: &mut [Resolved]) {
        let slots: Vec<usize> = tail
            .iter()
            .enumerate()
            .filter(|(_, r)| self.priority.contains_key(&r.id))
            .map(|(i, _)| i)
            .collect();

        let mut ranked: Vec<Resolved> = slots.iter().map(|&i| tail[i].clone()).collect();
        ranked.sort_by_key(|r| self.priority[&r.id]);

        for (slot, stage) in slots.into_iter().zip(ranked) {
            tail[slot] = stage;
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("global", &self.global.iter().map(Resolved::label).collect::<Vec<_>>())
            .field("groups", &self.groups.keys().collect::<Vec<_>>())
            .field("aliases", &self.aliases)
            .field("registry", &self.registry)
            .finish()
    }
}

fn resolve_id<'a>(
    registry: &Registry,
    aliases: &'a HashMap<String, String>,
    name: &'a str,
) -> Option<&'a str> {
    match aliases.get(name) {
        Some(id) => Some(id),
        None => registry.contains(name).then_some(name),
    }
}

fn group_with_argument(reference: &StageRef) -> ConfigError {
    ConfigError::MalformedReference {
        reference: reference.to_string(),
        reason: "middleware groups take no argument",
    }
}

fn dedup(chain: Vec<Resolved>) -> Vec<Resolved> {
    let mut seen = HashSet::new();
    chain
        .into_iter()
        .filter(|r| seen.insert((r.id.clone(), r.argument.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::from_fn;

    fn noop_registry(ids: &[&'static str]) -> Registry {
        ids.iter().fold(Registry::new(), |reg, id| {
            reg.factory(id, |_arg| Ok(from_fn(|req, next: Next| next.run(req))))
        })
    }

    fn kernel() -> Kernel {
        Kernel::builder(noop_registry(&[
            "trace", "cors", "session", "csrf", "bindings", "authenticate", "authorize", "throttle",
        ]))
        .global(["trace", "cors"])
        .group("web", ["session", "csrf", "bindings"])
        .group("api", ["throttle:api", "bindings"])
        .alias("auth", "authenticate")
        .alias("can", "authorize")
        .priority(["session", "auth", "bindings", "authorize"])
        .build()
        .unwrap()
    }

    #[test]
    fn api_group_follows_global_stages() {
        let chain = kernel().compose(["api"]).unwrap();
        assert_eq!(chain.labels(), ["trace", "cors", "throttle:api", "bindings"]);
    }

    #[test]
    fn priority_moves_authentication_before_bindings() {
        let chain = kernel().compose(["api", "auth"]).unwrap();
        assert_eq!(chain.labels(), ["trace", "cors", "throttle:api", "authenticate", "bindings"]);
    }

    #[test]
    fn unprioritized_stages_keep_their_slots() {
        let chain = kernel().compose(["can:edit", "csrf", "auth"]).unwrap();
        assert_eq!(chain.labels(), ["trace", "cors", "authenticate", "csrf", "authorize:edit"]);
    }

    #[test]
    fn first_occurrence_wins_on_duplicates() {
        let chain = kernel().compose(["web", "bindings", "trace"]).unwrap();
        assert_eq!(chain.labels(), ["trace", "cors", "session", "csrf", "bindings"]);
    }

    #[test]
    fn different_arguments_are_different_stages() {
        let chain = kernel().compose(["api", "throttle:5,1"]).unwrap();
        assert_eq!(chain.labels(), ["trace", "cors", "throttle:api", "bindings", "throttle:5,1"]);
    }

    #[test]
    fn composing_twice_gives_the_same_chain() {
        let k = kernel();
        let a = k.compose(["web", "auth", "can:book"]).unwrap();
        let b = k.compose(["web", "auth", "can:book"]).unwrap();
        assert_eq!(a.labels(), b.labels());
    }

    #[test]
    fn unknown_route_middleware_is_named() {
        let err = kernel().compose(["api", "frobnicate"]).unwrap_err();
        assert_eq!(err.to_string(), "unknown middleware `frobnicate`");
    }

    #[test]
    fn unknown_group_member_fails_the_build() {
        let err = Kernel::builder(noop_registry(&["trace"]))
            .group("api", ["trace", "frobnicate"])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStage { ref name } if name == "frobnicate"));
    }

    #[test]
    fn nested_groups_expand_inline() {
        let k = Kernel::builder(noop_registry(&["a", "b", "c"]))
            .group("inner", ["b"])
            .group("outer", ["a", "inner", "c"])
            .build()
            .unwrap();
        assert_eq!(k.compose(["outer"]).unwrap().labels(), ["a", "b", "c"]);
    }

    #[test]
    fn group_cycles_are_rejected() {
        let err = Kernel::builder(noop_registry(&["a"]))
            .group("one", ["a", "two"])
            .group("two", ["one"])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::GroupCycle { .. }));
    }

    #[test]
    fn duplicate_priority_entries_are_contradictory() {
        let err = Kernel::builder(noop_registry(&["authenticate"]))
            .alias("auth", "authenticate")
            .priority(["authenticate", "auth"])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePriority { ref id } if id == "authenticate"));
    }

    #[test]
    fn bad_aliases_are_rejected() {
        let reg = || noop_registry(&["authenticate"]);
        let cases = [
            Kernel::builder(reg()).alias("auth:sanctum", "authenticate").build(),
            Kernel::builder(reg()).alias("auth", "missing").build(),
            Kernel::builder(reg()).alias("auth", "authenticate").alias("auth", "authenticate").build(),
        ];
        for result in cases {
            assert!(matches!(result, Err(ConfigError::InvalidAlias { .. })));
        }
    }

    #[test]
    fn prioritized_stages_cannot_be_global() {
        let err = Kernel::builder(noop_registry(&["session", "authenticate"]))
            .global(["authenticate"])
            .group("web", ["session"])
            .alias("auth", "authenticate")
            .priority(["session", "auth"])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::PrioritizedGlobal { ref id } if id == "authenticate"));
    }

    #[test]
    fn groups_take_no_argument() {
        let err = kernel().compose(["api:fast"]).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedReference { .. }));
    }
}
