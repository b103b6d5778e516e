use objlink_channel::{connect_with, ConnectOptions, EndpointConfig};
use objlink_wire::{ModuleRequest, ObjectRef, Origin, Value};

use crate::cmd::{parse_duration, CallArgs};
use crate::exit::{channel_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{json_arg_to_value, print_value, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)
        .ok_or_else(|| CliError::new(USAGE, format!("invalid timeout: {}", args.timeout)))?;

    let call_args = args
        .args
        .iter()
        .map(|raw| json_arg_to_value(raw))
        .collect::<Result<Vec<Value>, CliError>>()?;

    let module = ModuleRequest {
        url: format!("tcp://{}", args.addr),
        session_key: String::new(),
        module_id: args.module.clone(),
        user_agent: concat!("objlink-cli/", env!("CARGO_PKG_VERSION")).to_owned(),
    };
    let options = ConnectOptions {
        config: EndpointConfig::default().with_call_timeout(Some(timeout)),
        ..ConnectOptions::default()
    };

    let (mut endpoint, version) = connect_with(args.addr.as_str(), module, options)
        .map_err(|err| channel_error("connect failed", err))?;
    tracing::debug!(version, "session established");

    let target = match args.target_handle {
        None => Value::Null,
        Some(handle) => Value::Object(ObjectRef::new(Origin::Host, handle)),
    };

    let result = endpoint
        .invoke(target, &args.method, call_args)
        .map_err(|err| channel_error("call failed", err))?;
    print_value(&result, format);

    if let Err(err) = endpoint.quit() {
        tracing::debug!(error = %err, "quit after call failed");
    }
    Ok(SUCCESS)
}
