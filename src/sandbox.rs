//! V8-based evaluation sandbox for player transforms.
//!
//! Uses `deno_core` to embed a V8 engine. Every [`Sandbox::prepare`] call
//! builds fresh isolates with no extensions loaded, one per transform, so
//! transforms get no network, filesystem or timer access and cannot observe
//! each other or transforms prepared for another player.
//!
//! `JsRuntime` is not `Send`; callers on an async runtime prepare and invoke
//! [`Transforms`] together on a blocking thread. V8 enters an isolate when it
//! is created and requires isolates on one thread to be dropped in reverse
//! order of creation, which is why prepared transforms are not kept around
//! between requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use deno_core::{JsRuntime, RuntimeOptions, v8};

use crate::error::ResolveError;
use crate::player::AnalysisResult;

const SIGNATURE_SLOT: &str = "__decrypterSignature";
const N_SLOT: &str = "__decrypterN";

/// Removes the bindings `deno_core` installs on every realm.
const SCRUB_HOST_BINDINGS: &str = r#"
(function () {
    for (const name of ["Deno", "__bootstrap"]) {
        try { delete globalThis[name]; } catch (_) {}
        if (name in globalThis) {
            try { globalThis[name] = undefined; } catch (_) {}
        }
    }
})();
"#;

/// Which of the two player transforms to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transform {
    Signature,
    N,
}

impl Transform {
    fn slot(self) -> &'static str {
        match self {
            Transform::Signature => SIGNATURE_SLOT,
            Transform::N => N_SLOT,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Transform::Signature => "signature",
            Transform::N => "n",
        }
    }

    fn script_name(self) -> &'static str {
        match self {
            Transform::Signature => "[signature_transform]",
            Transform::N => "[n_transform]",
        }
    }
}

/// Factory for isolated transform contexts.
///
/// Clones share one watchdog thread that enforces the per-script timeout.
#[derive(Clone)]
pub struct Sandbox {
    timeout: Duration,
    watchdog: Arc<Watchdog>,
}

impl Sandbox {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            watchdog: Arc::new(Watchdog::spawn()),
        }
    }

    /// Bind both transforms of `analysis`, each in a fresh isolate of its own.
    pub fn prepare(&self, analysis: &AnalysisResult) -> Result<Transforms, ResolveError> {
        let signature = TransformContext::load(
            Transform::Signature,
            &analysis.sig_transform_source,
            self.timeout,
            Arc::clone(&self.watchdog),
        )?;
        let n = TransformContext::load(
            Transform::N,
            &analysis.n_transform_source,
            self.timeout,
            Arc::clone(&self.watchdog),
        )?;
        Ok(Transforms { n, signature })
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

/// The two callables recovered from one player.
///
/// Several `Transforms` alive on one thread must be dropped in reverse
/// order of preparation.
pub struct Transforms {
    // Fields drop in declaration order; the n isolate was created last.
    n: TransformContext,
    signature: TransformContext,
}

impl Transforms {
    pub fn signature(&mut self, input: &str) -> Result<String, ResolveError> {
        self.signature.invoke(input)
    }

    pub fn n(&mut self, input: &str) -> Result<String, ResolveError> {
        self.n.invoke(input)
    }
}

/// One transform bound inside its own V8 isolate.
struct TransformContext {
    runtime: JsRuntime,
    transform: Transform,
    timeout: Duration,
    watchdog: Arc<Watchdog>,
}

impl TransformContext {
    fn load(
        transform: Transform,
        source: &str,
        timeout: Duration,
        watchdog: Arc<Watchdog>,
    ) -> Result<Self, ResolveError> {
        let mut context = Self {
            runtime: JsRuntime::new(RuntimeOptions::default()),
            transform,
            timeout,
            watchdog,
        };

        context
            .runtime
            .execute_script("[scrub_host]", SCRUB_HOST_BINDINGS)
            .map_err(|e| ResolveError::Execution(format!("failed to prepare isolate: {}", e)))?;

        let script = format!("globalThis.{} = (\n{}\n);", transform.slot(), source);
        let name = transform.script_name();
        context.with_deadline(|runtime| {
            runtime.execute_script(name, script).map_err(|e| {
                ResolveError::Execution(format!("failed to load {} transform: {}", transform.label(), e))
            })
        })?;

        Ok(context)
    }

    fn invoke(&mut self, input: &str) -> Result<String, ResolveError> {
        // JSON string literals are valid JS string literals.
        let literal = serde_json::to_string(input)
            .map_err(|e| ResolveError::Execution(format!("cannot encode input: {}", e)))?;

        let label = self.transform.label();
        let call_script = format!(
            r#"(function (input) {{
                var out = globalThis.{slot}(input);
                if (typeof out !== "string") {{
                    throw new TypeError("{label} transform returned " + typeof out);
                }}
                return out;
            }})({literal})"#,
            slot = self.transform.slot(),
        );

        let result = self.with_deadline(|runtime| {
            runtime
                .execute_script("[invoke_transform]", call_script)
                .map_err(|e| ResolveError::Execution(format!("{} transform threw: {}", label, e)))
        })?;

        self.read_string(&result)
    }

    /// Run `f` with the watchdog armed to terminate execution once the
    /// deadline passes.
    fn with_deadline<T>(
        &mut self,
        f: impl FnOnce(&mut JsRuntime) -> Result<T, ResolveError>,
    ) -> Result<T, ResolveError> {
        let handle = self.runtime.v8_isolate().thread_safe_handle();
        let guard = self.watchdog.arm(handle, Instant::now() + self.timeout)?;

        let result = f(&mut self.runtime);
        let fired = guard.disarm();

        if fired {
            self.runtime.v8_isolate().cancel_terminate_execution();
            if result.is_err() {
                return Err(ResolveError::Execution(format!(
                    "{} transform exceeded {:?}",
                    self.transform.label(),
                    self.timeout
                )));
            }
        }
        result
    }

    fn read_string(&mut self, result: &v8::Global<v8::Value>) -> Result<String, ResolveError> {
        let context = self.runtime.main_context();
        let isolate = self.runtime.v8_isolate();
        let mut handle_scope = v8::HandleScope::new(isolate);
        let handle_scope = unsafe { std::pin::Pin::new_unchecked(&mut handle_scope) };
        let handle_scope = &mut handle_scope.init();
        let context_local = v8::Local::new(handle_scope, context);
        let scope = &mut v8::ContextScope::new(handle_scope, context_local);
        let local = v8::Local::new(scope, result);
        let str_val = local
            .to_string(scope)
            .ok_or_else(|| ResolveError::Execution("V8 result is not a string".to_string()))?;
        Ok(str_val.to_rust_string_lossy(scope))
    }
}

enum Command {
    Arm {
        id: u64,
        deadline: Instant,
        handle: v8::IsolateHandle,
        fired: Arc<AtomicBool>,
    },
    Disarm {
        id: u64,
        ack: mpsc::Sender<()>,
    },
}

struct Armed {
    deadline: Instant,
    handle: v8::IsolateHandle,
    fired: Arc<AtomicBool>,
}

/// Background thread that terminates isolates running past their deadline.
///
/// Exits once every [`Sandbox`] clone holding it is gone.
struct Watchdog {
    commands: mpsc::Sender<Command>,
    next_id: AtomicU64,
}

impl Watchdog {
    fn spawn() -> Self {
        let (commands, rx) = mpsc::channel();
        std::thread::spawn(move || Self::run(rx));
        Self {
            commands,
            next_id: AtomicU64::new(0),
        }
    }

    fn arm(
        &self,
        handle: v8::IsolateHandle,
        deadline: Instant,
    ) -> Result<DeadlineGuard<'_>, ResolveError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let fired = Arc::new(AtomicBool::new(false));
        self.commands
            .send(Command::Arm {
                id,
                deadline,
                handle,
                fired: Arc::clone(&fired),
            })
            .map_err(|_| ResolveError::Execution("sandbox watchdog is not running".to_string()))?;
        Ok(DeadlineGuard {
            watchdog: self,
            id,
            fired,
        })
    }

    fn run(rx: mpsc::Receiver<Command>) {
        let mut armed: HashMap<u64, Armed> = HashMap::new();
        loop {
            let next_deadline = armed.values().map(|a| a.deadline).min();
            let command = match next_deadline {
                Some(deadline) => {
                    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                        Ok(command) => Some(command),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
                None => match rx.recv() {
                    Ok(command) => Some(command),
                    Err(_) => return,
                },
            };

            match command {
                Some(Command::Arm {
                    id,
                    deadline,
                    handle,
                    fired,
                }) => {
                    armed.insert(
                        id,
                        Armed {
                            deadline,
                            handle,
                            fired,
                        },
                    );
                }
                Some(Command::Disarm { id, ack }) => {
                    armed.remove(&id);
                    let _ = ack.send(());
                }
                None => {}
            }

            let now = Instant::now();
            armed.retain(|_, entry| {
                if entry.deadline > now {
                    return true;
                }
                entry.fired.store(true, Ordering::SeqCst);
                let _ = entry.handle.terminate_execution();
                tracing::warn!("Terminated a transform that ran past its deadline");
                false
            });
        }
    }
}

/// One armed deadline. Disarming waits for the watchdog to acknowledge, so
/// no termination can land after it returns.
struct DeadlineGuard<'a> {
    watchdog: &'a Watchdog,
    id: u64,
    fired: Arc<AtomicBool>,
}

impl DeadlineGuard<'_> {
    /// Whether the deadline fired before the guard was disarmed.
    fn disarm(self) -> bool {
        let (ack, acked) = mpsc::channel();
        let sent = self
            .watchdog
            .commands
            .send(Command::Disarm { id: self.id, ack })
            .is_ok();
        if sent {
            let _ = acked.recv();
        }
        self.fired.load(Ordering::SeqCst)
    }
}
