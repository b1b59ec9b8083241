//! # Reference resolver.
//!
//! A [`ReferenceResolver`] tracks the registry matches of one reference of one instance.
//!
//! ## Effective parameters
//! ```text
//! filter  = (&(objectClass=<service type>) <static target> <props["<name>.target"]>)
//! minimum = max(declared minimum, props["<name>.cardinality.minimum"])
//! bound   = first `maximum` matches (all if unbounded)
//! ```
//! The override can only raise the minimum; a required reference never becomes optional
//! through configuration.
//!
//! ## Rules
//! - Matches are ordered best first (ranking descending, service id ascending).
//! - Every registry change re-queries the registry; the change callback fires only when
//!   the match list actually changed, outside the resolver lock.
//! - After [`close`](ReferenceResolver::close) no callback fires.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::error::LifecycleError;
use crate::filter::Filter;
use crate::live::ReferenceLive;
use crate::properties::{self, Properties};
use crate::registry::{ServiceEvent, ServiceListener, ServiceRef, ServiceRegistry, WatchId};
use crate::template::ReferenceTemplate;

/// A change of the match list of one reference.
#[derive(Clone, Debug)]
pub struct ReferenceChange {
    pub reference: String,
    pub was_satisfied: bool,
    pub satisfied: bool,
    /// All matches after the change, best first.
    pub matches: Vec<ServiceRef>,
    pub previous_bound: Vec<ServiceRef>,
    pub bound: Vec<ServiceRef>,
}

impl ReferenceChange {
    /// Satisfaction flipped.
    pub fn crossed(&self) -> bool {
        self.was_satisfied != self.satisfied
    }

    /// The bound set differs.
    pub fn bound_changed(&self) -> bool {
        self.previous_bound != self.bound
    }

    /// One of `held` no longer matches.
    pub fn lost(&self, held: &[ServiceRef]) -> bool {
        held.iter().any(|r| !self.matches.contains(r))
    }
}

type OnChange = Box<dyn Fn(&ReferenceChange) + Send + Sync>;

#[derive(Default)]
struct State {
    matches: Vec<ServiceRef>,
    watch: Option<WatchId>,
    closed: bool,
}

/// Watches the registry for the matches of one reference.
pub struct ReferenceResolver {
    template: ReferenceTemplate,
    filter: Filter,
    minimum: usize,
    registry: Arc<dyn ServiceRegistry>,
    state: Mutex<State>,
    on_change: OnChange,
}

struct Watcher(Weak<ReferenceResolver>);

impl ServiceListener for Watcher {
    fn service_changed(&self, _event: &ServiceEvent) {
        if let Some(resolver) = self.0.upgrade() {
            resolver.refresh();
        }
    }
}

impl ReferenceResolver {
    /// Computes the effective filter and minimum of `template` for an instance with
    /// `props`, and starts watching.
    pub fn open<F>(
        template: &ReferenceTemplate,
        instance: &str,
        props: &Properties,
        registry: Arc<dyn ServiceRegistry>,
        on_change: F,
    ) -> Result<Arc<Self>, LifecycleError>
    where
        F: Fn(&ReferenceChange) + Send + Sync + 'static,
    {
        let filter = effective_filter(template, instance, props)?;
        let minimum = effective_minimum(template, instance, props)?;
        let resolver = Arc::new(Self {
            template: template.clone(),
            filter,
            minimum,
            registry,
            state: Mutex::new(State::default()),
            on_change: Box::new(on_change),
        });

        let watch = resolver
            .registry
            .watch(resolver.filter.clone(), Arc::new(Watcher(Arc::downgrade(&resolver))));
        {
            let mut state = resolver.state.lock();
            state.watch = Some(watch);
            state.matches = resolver.registry.find(&resolver.filter);
        }
        trace!(instance, reference = %template.name, filter = %resolver.filter, "reference watched");
        Ok(resolver)
    }

    /// Stops watching; idempotent.
    pub fn close(&self) {
        let watch = {
            let mut state = self.state.lock();
            state.closed = true;
            state.watch.take()
        };
        if let Some(id) = watch {
            self.registry.unwatch(id);
        }
    }

    fn refresh(&self) {
        let change = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            let matches = self.registry.find(&self.filter);
            if matches == state.matches {
                return;
            }
            let previous = std::mem::replace(&mut state.matches, matches);
            ReferenceChange {
                reference: self.template.name.clone(),
                was_satisfied: previous.len() >= self.minimum,
                satisfied: state.matches.len() >= self.minimum,
                matches: state.matches.clone(),
                previous_bound: self.bind(&previous),
                bound: self.bind(&state.matches),
            }
        };
        (self.on_change)(&change);
    }

    fn bind(&self, matches: &[ServiceRef]) -> Vec<ServiceRef> {
        let n = self.template.maximum.unwrap_or(usize::MAX).min(matches.len());
        matches[..n].to_vec()
    }

    pub fn template(&self) -> &ReferenceTemplate {
        &self.template
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Effective minimum cardinality.
    pub fn minimum(&self) -> usize {
        self.minimum
    }

    pub fn is_satisfied(&self) -> bool {
        self.state.lock().matches.len() >= self.minimum
    }

    /// All matches, best first.
    pub fn matches(&self) -> Vec<ServiceRef> {
        self.state.lock().matches.clone()
    }

    /// The matches handed to the component.
    pub fn bound(&self) -> Vec<ServiceRef> {
        self.bind(&self.state.lock().matches)
    }

    /// Immutable view for the live DTOs.
    pub fn live(&self) -> ReferenceLive {
        let matches = self.matches();
        ReferenceLive {
            template: self.template.clone(),
            target: self.filter.to_string(),
            minimum: self.minimum,
            bound: self.bind(&matches),
            matches,
        }
    }
}

impl Drop for ReferenceResolver {
    fn drop(&mut self) {
        self.close();
    }
}

fn effective_filter(
    template: &ReferenceTemplate,
    instance: &str,
    props: &Properties,
) -> Result<Filter, LifecycleError> {
    let parse = |source: &str| {
        source
            .parse::<Filter>()
            .map_err(|e| LifecycleError::reference(instance, &template.name, format!("target {source:?}: {e}")))
    };
    let mut parts = vec![Filter::object_class(&template.service_type)];
    if let Some(target) = &template.target {
        parts.push(parse(target)?);
    }
    if let Some(target) = properties::string(props, &template.target_property()) {
        parts.push(parse(target)?);
    }
    Ok(Filter::all(parts))
}

fn effective_minimum(
    template: &ReferenceTemplate,
    instance: &str,
    props: &Properties,
) -> Result<usize, LifecycleError> {
    let key = template.minimum_property();
    match properties::integer(props, &key) {
        None => Ok(template.minimum),
        Some(Ok(n)) => {
            let n = usize::try_from(n).unwrap_or(0);
            if let Some(max) = template.maximum {
                if n > max {
                    return Err(LifecycleError::reference(
                        instance,
                        &template.name,
                        format!("{key}={n} exceeds maximum {max}"),
                    ));
                }
            }
            Ok(template.minimum.max(n))
        }
        Some(Err(reason)) => Err(LifecycleError::reference(instance, &template.name, reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InMemoryRegistry, ServiceObject};
    use serde_json::json;

    fn register(registry: &InMemoryRegistry, ty: &str, props: Properties) -> ServiceRef {
        registry.register(&[ty.to_string()], props, ServiceObject::Singleton(Arc::new(())))
    }

    fn ranked(r: i64) -> Properties {
        let mut p = Properties::new();
        p.insert(properties::SERVICE_RANKING.into(), json!(r));
        p
    }

    fn recording() -> (Arc<Mutex<Vec<ReferenceChange>>>, impl Fn(&ReferenceChange) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |c: &ReferenceChange| sink.lock().push(c.clone()))
    }

    #[test]
    fn crossing_the_minimum_is_reported() {
        let registry = Arc::new(InMemoryRegistry::new());
        let (seen, on_change) = recording();
        let resolver = ReferenceResolver::open(
            &ReferenceTemplate::mandatory("foo", "Foo"),
            "a",
            &Properties::new(),
            registry.clone(),
            on_change,
        )
        .unwrap();
        assert!(!resolver.is_satisfied());

        let svc = register(&registry, "Foo", Properties::new());
        register(&registry, "Bar", Properties::new());
        assert!(resolver.is_satisfied());
        registry.unregister(&svc);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].crossed() && seen[0].satisfied);
        assert!(seen[1].crossed() && !seen[1].satisfied);
        assert!(seen[1].lost(std::slice::from_ref(&svc)));
    }

    #[test]
    fn bound_set_follows_ranking() {
        let registry = Arc::new(InMemoryRegistry::new());
        let (seen, on_change) = recording();
        let low = register(&registry, "Foo", ranked(1));
        let resolver = ReferenceResolver::open(
            &ReferenceTemplate::mandatory("foo", "Foo"),
            "a",
            &Properties::new(),
            registry.clone(),
            on_change,
        )
        .unwrap();
        assert_eq!(resolver.bound(), vec![low.clone()]);

        let high = register(&registry, "Foo", ranked(5));
        assert_eq!(resolver.matches(), vec![high.clone(), low.clone()]);
        assert_eq!(resolver.bound(), vec![high.clone()]);

        let change = seen.lock()[0].clone();
        assert!(!change.crossed());
        assert!(change.bound_changed());
        assert!(!change.lost(std::slice::from_ref(&low)));

        registry.unregister(&low);
        let change = seen.lock()[1].clone();
        assert!(!change.bound_changed());
        assert!(change.lost(&[low]));
    }

    #[test]
    fn property_overrides_narrow_and_raise() {
        let registry = Arc::new(InMemoryRegistry::new());
        let mut red = Properties::new();
        red.insert("color".into(), json!("red"));
        register(&registry, "Foo", red);
        register(&registry, "Foo", Properties::new());

        let mut props = Properties::new();
        props.insert("foo.target".into(), json!("(color=red)"));
        props.insert("foo.cardinality.minimum".into(), json!(2));
        let resolver = ReferenceResolver::open(
            &ReferenceTemplate::multiple("foo", "Foo"),
            "a",
            &props,
            registry.clone(),
            |_| {},
        )
        .unwrap();

        assert_eq!(resolver.matches().len(), 1);
        assert_eq!(resolver.minimum(), 2);
        assert!(!resolver.is_satisfied());
        assert_eq!(resolver.filter().to_string(), "(&(objectClass=Foo)(color=red))");
    }

    #[test]
    fn override_never_lowers_the_minimum() {
        let registry: Arc<dyn ServiceRegistry> = Arc::new(InMemoryRegistry::new());
        let mut props = Properties::new();
        props.insert("foo.cardinality.minimum".into(), json!(0));
        let resolver = ReferenceResolver::open(
            &ReferenceTemplate::mandatory("foo", "Foo"),
            "a",
            &props,
            registry,
            |_| {},
        )
        .unwrap();
        assert_eq!(resolver.minimum(), 1);
    }

    #[test]
    fn bad_overrides_fail_the_open() {
        let registry: Arc<dyn ServiceRegistry> = Arc::new(InMemoryRegistry::new());
        let mut props = Properties::new();
        props.insert("foo.target".into(), json!("(color=red"));
        let err = ReferenceResolver::open(
            &ReferenceTemplate::mandatory("foo", "Foo"),
            "a",
            &props,
            registry.clone(),
            |_| {},
        )
        .err()
        .unwrap();
        assert_eq!(err.as_label(), "lifecycle_reference");

        let mut props = Properties::new();
        props.insert("foo.cardinality.minimum".into(), json!("many"));
        assert!(
            ReferenceResolver::open(&ReferenceTemplate::mandatory("foo", "Foo"), "a", &props, registry, |_| {})
                .is_err()
        );
    }

    #[test]
    fn closed_resolver_stays_quiet() {
        let registry = Arc::new(InMemoryRegistry::new());
        let (seen, on_change) = recording();
        let resolver = ReferenceResolver::open(
            &ReferenceTemplate::mandatory("foo", "Foo"),
            "a",
            &Properties::new(),
            registry.clone(),
            on_change,
        )
        .unwrap();
        resolver.close();
        register(&registry, "Foo", Properties::new());
        assert!(seen.lock().is_empty());
    }
}
