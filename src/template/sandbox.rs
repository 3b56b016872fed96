//! Capability-restricted handlebars registry
//!
//! The registry built here is the only place templates are ever evaluated.
//! It binds no partials, no template loaders and no helpers with I/O; the
//! builtin `each` is swapped for a budgeted version and the dynamic-access
//! builtins (`lookup`, `log`, `raw`) are removed.

use handlebars::{
    BlockContext, BlockParams, Context, Decorator, DecoratorDef, Handlebars, Helper, HelperDef, HelperResult, JsonRender,
    Output, RenderContext, RenderErrorReason, Renderable, handlebars_helper, no_escape,
};
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use super::renderer::RenderLimits;
use crate::error::ResourceLimit;

/// Control and logic helpers templates may call
pub const CONTROL_HELPERS: [&str; 14] = [
    "if", "unless", "each", "with", "eq", "ne", "gt", "gte", "lt", "lte", "and", "or", "not", "len",
];

/// Pure string filters templates may call
pub const STRING_FILTERS: [&str; 6] = ["upper", "lower", "trim", "capitalize", "truncate", "join"];

/// Builtins removed from the registry
const REMOVED_BUILTINS: [&str; 3] = ["lookup", "log", "raw"];

/// Whether a helper name is on the allow-list
pub fn is_allowed_helper(name: &str) -> bool {
    CONTROL_HELPERS.contains(&name) || STRING_FILTERS.contains(&name)
}

/// Per-render resource accounting shared by the output writer and loop helper
#[derive(Debug)]
pub(crate) struct RenderBudget {
    limits: RenderLimits,
    started: Instant,
    iterations: AtomicUsize,
    written: AtomicUsize,
    breach: Mutex<Option<ResourceLimit>>,
}

impl RenderBudget {
    pub(crate) fn new(limits: RenderLimits) -> Arc<Self> {
        Arc::new(Self {
            limits,
            started: Instant::now(),
            iterations: AtomicUsize::new(0),
            written: AtomicUsize::new(0),
            breach: Mutex::new(None),
        })
    }

    fn trip(&self, limit: ResourceLimit) -> ResourceLimit {
        let mut breach = self.breach.lock();
        breach.get_or_insert(limit).clone()
    }

    pub(crate) fn breach(&self) -> Option<ResourceLimit> {
        self.breach.lock().clone()
    }

    pub(crate) fn check_deadline(&self) -> Result<(), ResourceLimit> {
        if self.started.elapsed() > self.limits.timeout {
            return Err(self.trip(ResourceLimit::timeout(self.limits.timeout)));
        }
        Ok(())
    }

    pub(crate) fn charge_iteration(&self) -> Result<(), ResourceLimit> {
        let count = self.iterations.fetch_add(1, Ordering::Relaxed) + 1;
        if count > self.limits.max_loop_iterations {
            return Err(self.trip(ResourceLimit::LoopIterations {
                limit: self.limits.max_loop_iterations,
            }));
        }
        self.check_deadline()
    }

    pub(crate) fn charge_output(&self, bytes: usize) -> Result<(), ResourceLimit> {
        let total = self.written.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if total > self.limits.max_output_bytes {
            return Err(self.trip(ResourceLimit::OutputTooLarge {
                limit: self.limits.max_output_bytes,
            }));
        }
        self.check_deadline()
    }

    pub(crate) fn iterations(&self) -> usize {
        self.iterations.load(Ordering::Relaxed)
    }
}

/// `each` with a shared iteration budget
///
/// Behaves like the builtin for arrays and objects (`@index`, `@key`,
/// `@first`, `@last`, block params, `{{else}}`), but charges every iteration
/// against the render budget and aborts once it is spent.
struct BoundedEach {
    budget: Arc<RenderBudget>,
}

impl HelperDef for BoundedEach {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let value = h.param(0).ok_or(RenderErrorReason::ParamNotFoundForIndex("each", 0))?;
        let Some(template) = h.template() else {
            return Ok(());
        };

        let items: Vec<(Json, Json)> = match value.value() {
            Json::Array(list) if !list.is_empty() => list
                .iter()
                .enumerate()
                .map(|(i, v)| (Json::from(i), v.clone()))
                .collect(),
            Json::Object(obj) if !obj.is_empty() => obj.iter().map(|(k, v)| (Json::from(k.clone()), v.clone())).collect(),
            Json::Array(_) | Json::Object(_) if h.inverse().is_none() => return Ok(()),
            _ => {
                return if let Some(inverse) = h.inverse() {
                    inverse.render(r, ctx, rc, out)
                } else if r.strict_mode() {
                    Err(handlebars::RenderError::strict_error(value.relative_path()))
                } else {
                    Ok(())
                };
            }
        };

        let len = items.len();
        rc.push_block(BlockContext::new());
        for (i, (key, item)) in items.into_iter().enumerate() {
            if let Err(limit) = self.budget.charge_iteration() {
                rc.pop_block();
                return Err(RenderErrorReason::Other(limit.to_string()).into());
            }

            if let Some(block) = rc.block_mut() {
                block.set_local_var("first", Json::Bool(i == 0));
                block.set_local_var("last", Json::Bool(i + 1 == len));
                block.set_local_var("index", Json::from(i));
                if key.is_string() {
                    block.set_local_var("key", key.clone());
                }

                if let Some(name) = h.block_param() {
                    let mut params = BlockParams::new();
                    params.add_value(name, item.clone())?;
                    block.set_block_params(params);
                } else if let Some((name, key_name)) = h.block_param_pair() {
                    let mut params = BlockParams::new();
                    params.add_value(name, item.clone())?;
                    params.add_value(key_name, key)?;
                    block.set_block_params(params);
                }
                block.set_base_value(item);
            }

            template.render(r, ctx, rc, out)?;
        }
        rc.pop_block();
        Ok(())
    }
}

/// Decorators are not part of the sandbox
struct DeniedDecorator;

impl DecoratorDef for DeniedDecorator {
    fn call<'reg: 'rc, 'rc>(
        &'reg self,
        d: &Decorator<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
    ) -> Result<(), handlebars::RenderError> {
        Err(RenderErrorReason::DecoratorNotFound(d.name().to_string()).into())
    }
}

fn capitalize_str(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

handlebars_helper!(upper: |s: str| s.to_uppercase());
handlebars_helper!(lower: |s: str| s.to_lowercase());
handlebars_helper!(trim: |s: str| s.trim().to_string());
handlebars_helper!(capitalize: |s: str| capitalize_str(s));
handlebars_helper!(truncate: |s: str, n: u64| s.chars().take(n as usize).collect::<String>());
handlebars_helper!(join: |list: array, {sep: str = ", "}| {
    list.iter().map(|v| v.render()).collect::<Vec<String>>().join(sep)
});

/// Build a fresh sandboxed registry bound to one render budget
pub(crate) fn build_registry(budget: Arc<RenderBudget>) -> Handlebars<'static> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry.set_dev_mode(false);
    registry.register_escape_fn(no_escape);

    for name in REMOVED_BUILTINS {
        registry.unregister_helper(name);
    }
    registry.register_helper("each", Box::new(BoundedEach { budget }));
    registry.register_decorator("inline", Box::new(DeniedDecorator));

    registry.register_helper("upper", Box::new(upper));
    registry.register_helper("lower", Box::new(lower));
    registry.register_helper("trim", Box::new(trim));
    registry.register_helper("capitalize", Box::new(capitalize));
    registry.register_helper("truncate", Box::new(truncate));
    registry.register_helper("join", Box::new(join));
    registry
}
