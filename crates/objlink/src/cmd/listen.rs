use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use objlink_channel::{
    AcceptAllModules, ChannelListener, Dispatch, Endpoint, ModuleLoader, Outcome, SpecialDispatch,
    Thrown, GET_PROPERTY, SET_PROPERTY,
};
use objlink_wire::{ModuleRequest, Value};

use crate::cmd::ListenArgs;
use crate::exit::{channel_error, CliError, CliResult, SUCCESS};
use crate::output::OutputFormat;

/// Root object served to every session: a few methods that exercise each
/// value shape, plus a property bag behind the special dispatch ids.
struct DemoRoot;

impl Dispatch for DemoRoot {
    fn invoke(&self, _channel: &mut Endpoint, method: &str, args: &[Value]) -> Outcome {
        match method {
            "echo" => Ok(args.first().cloned().unwrap_or(Value::Undefined)),
            "add" => {
                let mut sum = 0i64;
                for arg in args {
                    let n = arg
                        .as_i32()
                        .ok_or_else(|| Thrown::Message(format!("add wants integers, got {arg}")))?;
                    sum += i64::from(n);
                }
                i32::try_from(sum)
                    .map(Value::Int)
                    .map_err(|_| Thrown::from("sum does not fit a wire integer"))
            }
            "concat" => {
                let mut joined = String::new();
                for arg in args {
                    match arg {
                        Value::Str(s) => joined.push_str(s),
                        other => joined.push_str(&other.to_string()),
                    }
                }
                Ok(Value::Str(joined))
            }
            "describe" => Ok(Value::Str("demo root: echo, add, concat, describe".into())),
            other => Err(Thrown::Message(format!("no such method: {other}"))),
        }
    }
}

struct PropertyBag {
    values: Mutex<HashMap<String, Value>>,
}

impl SpecialDispatch for PropertyBag {
    fn dispatch(&self, _channel: &mut Endpoint, args: &[Value]) -> Outcome {
        // args: [target, name] reads, [target, name, value] writes.
        let name = args
            .get(1)
            .and_then(|v| v.as_str())
            .ok_or(Thrown::from("expected a property name"))?;
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        match args.get(2) {
            None => Ok(values.get(name).cloned().unwrap_or(Value::Undefined)),
            Some(value) => {
                values.insert(name.to_owned(), value.clone());
                Ok(Value::Undefined)
            }
        }
    }
}

struct AllowList {
    modules: Vec<String>,
}

impl ModuleLoader for AllowList {
    fn load(&self, request: &ModuleRequest) -> Result<(), String> {
        if self.modules.iter().any(|m| m == &request.module_id) {
            Ok(())
        } else {
            Err(format!("module {} is not served here", request.module_id))
        }
    }
}

pub fn run(args: ListenArgs, _format: OutputFormat) -> CliResult<i32> {
    let listener = ChannelListener::bind(args.addr.as_str())
        .map_err(|err| channel_error("bind failed", err))?;
    let addr = listener
        .local_addr()
        .map_err(|err| channel_error("bind failed", err))?;
    tracing::info!(%addr, "listening");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let loader: Box<dyn ModuleLoader> = match args.modules {
        Some(modules) => Box::new(AllowList { modules }),
        None => Box::new(AcceptAllModules),
    };
    let bag = Arc::new(PropertyBag {
        values: Mutex::new(HashMap::new()),
    });

    let mut served = 0usize;
    while running.load(Ordering::SeqCst) {
        let (mut endpoint, request) = match listener.accept(Arc::new(DemoRoot), loader.as_ref()) {
            Ok(session) => session,
            Err(err) => {
                // A failed handshake ends that connection, not the server.
                tracing::warn!(error = %err, "session setup failed");
                continue;
            }
        };
        endpoint.register_special(GET_PROPERTY, bag.clone());
        endpoint.register_special(SET_PROPERTY, bag.clone());

        thread::spawn(move || {
            let module = request.module_id;
            match endpoint.serve() {
                Ok(()) => tracing::info!(module, "session ended"),
                Err(err) => tracing::warn!(module, error = %err, "session failed"),
            }
        });

        served = served.saturating_add(1);
        if let Some(limit) = args.sessions {
            if served >= limit {
                break;
            }
        }
    }

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
