//! Minimal end-to-end bridge: host and client in one process.
//!
//! Run with: cargo run -p objlink --example bridge-demo

use std::sync::Arc;
use std::thread;

use objlink::channel::{
    connect, AcceptAllModules, ChannelListener, Dispatch, Endpoint, Outcome, Thrown,
};
use objlink::wire::{ModuleRequest, Value};

struct Adder;

impl Dispatch for Adder {
    fn invoke(&self, _channel: &mut Endpoint, method: &str, args: &[Value]) -> Outcome {
        match method {
            "add" => {
                let a = args[0].as_i32().ok_or(Thrown::from("integers please"))?;
                let b = args[1].as_i32().ok_or(Thrown::from("integers please"))?;
                Ok(Value::Int(a + b))
            }
            other => Err(Thrown::Message(format!("no such method: {other}"))),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = ChannelListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let server = thread::spawn(move || {
        let (mut host, request) = listener
            .accept(Arc::new(Adder), &AcceptAllModules)
            .expect("session setup failed");
        println!("host: serving module {}", request.module_id);
        host.serve().expect("session failed");
    });

    let module = ModuleRequest {
        url: format!("tcp://{addr}"),
        session_key: String::new(),
        module_id: "adder".into(),
        user_agent: "bridge-demo".into(),
    };
    let (mut remote, version) = connect(addr, module)?;
    println!("client: protocol version {version}");

    let sum = remote.invoke(Value::Null, "add", vec![Value::Int(2), Value::Int(3)])?;
    println!("client: 2 + 3 = {sum}");

    remote.quit()?;
    server.join().expect("host thread panicked");
    Ok(())
}
