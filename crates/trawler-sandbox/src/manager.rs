//! Strategy evaluation.

use std::time::{Duration, Instant};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{Package, StandardPackage};
use rhai::{AST, Dynamic, Engine, EvalAltResult, Scope};
use tokio::time::timeout;

use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::helpers;
use crate::record::{ExtractedRecord, validate_output};

/// Name of the function every strategy must define.
pub const ENTRY_POINT: &str = "extract_tools";

/// How often (in operations) the progress callback checks the clock.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Slack given to the blocking evaluation before the async caller gives up.
const CALLER_GRACE: Duration = Duration::from_millis(250);

/// Executes extraction strategies inside a restricted Rhai engine.
///
/// Each call builds a fresh engine, so nothing a script does can leak into
/// the next evaluation.
#[derive(Debug, Clone, Default)]
pub struct StrategySandbox {
    config: SandboxConfig,
}

impl StrategySandbox {
    /// Create a sandbox with the given budgets.
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// The budgets this sandbox applies.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `implementation` against `payload` and validate the records it returns.
    pub async fn execute(
        &self,
        implementation: &str,
        payload: &str,
    ) -> SandboxResult<Vec<ExtractedRecord>> {
        let config = self.config.clone();
        let implementation = implementation.to_string();
        let payload = payload.to_string();
        let budget = config.timeout;

        let handle = tokio::task::spawn_blocking(move || {
            evaluate(&config, &implementation, payload)
        });

        match timeout(budget + CALLER_GRACE, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SandboxError::runtime(format!(
                "strategy evaluation aborted: {join_err}"
            ))),
            Err(_) => {
                tracing::warn!(timeout = ?budget, "Strategy evaluation exceeded its deadline");
                Err(SandboxError::Timeout(budget))
            }
        }
    }

    /// Compile `implementation` and check its entry point without running it.
    pub fn check(&self, implementation: &str) -> SandboxResult<()> {
        let engine = build_engine(&self.config, Instant::now() + self.config.timeout);
        compile(&engine, implementation).map(|_| ())
    }
}

fn evaluate(
    config: &SandboxConfig,
    implementation: &str,
    payload: String,
) -> SandboxResult<Vec<ExtractedRecord>> {
    let started = Instant::now();
    let engine = build_engine(config, started + config.timeout);
    let ast = compile(&engine, implementation)?;

    let mut scope = Scope::new();
    let value = engine
        .call_fn::<Dynamic>(&mut scope, &ast, ENTRY_POINT, (payload,))
        .map_err(|err| map_eval_error(*err, config.timeout))?;

    let records = validate_output(value, config.max_records)?;
    tracing::debug!(
        records = records.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Strategy evaluated"
    );
    Ok(records)
}

fn build_engine(config: &SandboxConfig, deadline: Instant) -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(StandardPackage::new().as_shared_module());
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.set_strict_variables(true);
    engine.disable_symbol("eval");

    engine.set_max_operations(config.max_operations);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);
    engine.set_max_call_levels(config.max_call_levels);

    engine.on_print(|text| tracing::debug!(target: "trawler_sandbox::script", "{text}"));
    engine.on_debug(|text, _source, pos| {
        tracing::debug!(target: "trawler_sandbox::script", %pos, "{text}")
    });
    engine.on_progress(move |ops| {
        if ops % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
            Some(Dynamic::from("deadline exceeded"))
        } else {
            None
        }
    });

    helpers::register(&mut engine);
    engine
}

fn compile(engine: &Engine, implementation: &str) -> SandboxResult<AST> {
    let ast = engine
        .compile(implementation)
        .map_err(|e| SandboxError::Compile(e.to_string()))?;

    let entry_points: Vec<usize> = ast
        .iter_functions()
        .filter(|f| f.name == ENTRY_POINT)
        .map(|f| f.params.len())
        .collect();

    match entry_points.as_slice() {
        [1] => Ok(ast),
        [] => Err(SandboxError::Compile(format!(
            "strategy must define fn {ENTRY_POINT}(html)"
        ))),
        [n] => Err(SandboxError::Compile(format!(
            "{ENTRY_POINT} must take exactly one parameter, found {n}"
        ))),
        _ => Err(SandboxError::Compile(format!(
            "strategy defines {ENTRY_POINT} {} times",
            entry_points.len()
        ))),
    }
}

fn map_eval_error(err: EvalAltResult, budget: Duration) -> SandboxError {
    match err {
        EvalAltResult::ErrorTerminated(..) | EvalAltResult::ErrorTooManyOperations(..) => {
            SandboxError::Timeout(budget)
        }
        other => SandboxError::runtime(other.to_string()),
    }
}
