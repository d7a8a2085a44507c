//! Hermes Props - demo Get/Set/GetAll/PropertiesChanged
//!
//! Server dan client berjalan di proses yang sama, terhubung lewat
//! socketpair. Server punya event loop sendiri di thread terpisah;
//! client memakai call sinkron lalu memompa loop-nya untuk signal.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hermes_props::core::FnAccessor;
use hermes_props::error::AccessorError;
use hermes_props::{
    Access, Connection, EventLoop, LoopConfig, Native, ObjectProxy, ObjectServer, PropertyDescriptor, Result,
    Signature, Value,
};
use tracing_subscriber::EnvFilter;

const PATH: &str = "/org/hermes/Demo";
const IFACE: &str = "org.hermes.Demo";

struct DemoConfig {
    verbose: bool,
    deadline: Duration,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            deadline: Duration::from_secs(10),
        }
    }
}

fn main() {
    let config = parse_args();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if config.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("🚀 Hermes Props - Property Access Demo");
    println!("======================================\n");

    if let Err(e) = run(&config) {
        eprintln!("❌ Demo failed: {}", e);
        std::process::exit(1);
    }

    println!("\n✅ Demo complete!");
}

fn run(config: &DemoConfig) -> Result<()> {
    let (client, server_conn) = Connection::pair()?;

    let server = ObjectServer::new();
    let registry = server.add_object(PATH)?;
    registry.register(PropertyDescriptor::stored(
        IFACE,
        "ReadOrWriteMe",
        Value::Str("initial".into()),
        Access::ReadWrite,
    ))?;
    registry.register(PropertyDescriptor::stored_native(
        IFACE,
        "MyArray",
        "ai",
        &Native::from(vec![42, 43]),
        Access::Read,
    )?)?;
    registry.register(PropertyDescriptor::stored_native(
        IFACE,
        "MyDict",
        "a{sv}",
        &Native::map([
            ("one", Native::from(1)),
            ("two", Native::from("dva")),
            ("three", Native::from(vec![3, 3, 3])),
        ]),
        Access::Read,
    )?)?;
    registry.register(
        PropertyDescriptor::stored(IFACE, "Counter", Value::UInt32(0), Access::ReadWrite).affects(["Label"]),
    )?;
    registry.register(PropertyDescriptor::stored(IFACE, "Label", Value::Str("zero".into()), Access::Read))?;
    registry.register(PropertyDescriptor::new(
        IFACE,
        "Broken",
        Signature::Str,
        Access::Read,
        Arc::new(FnAccessor::new(|| Err(AccessorError::new("Something failed")))),
    ))?;
    server.export_on(&server_conn);

    // Server loop di thread sendiri
    let mut server_loop = EventLoop::with_config(LoopConfig::default().with_deadline(config.deadline))?;
    server_loop.add_connection(&server_conn)?;
    let server_handle = server_loop.handle();
    let server_thread = thread::spawn(move || server_loop.run());

    // Client
    let mut client_loop = EventLoop::new()?;
    client_loop.add_connection(&client)?;
    let proxy = ObjectProxy::new(&client, None, PATH).interface(IFACE);

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    proxy.on_properties_changed(move |iface, changed, invalidated| {
        counter.fetch_add(1, Ordering::SeqCst);
        println!(
            "  📨 PropertiesChanged on {}: changed={:?} invalidated={:?}",
            iface,
            changed.keys().collect::<Vec<_>>(),
            invalidated
        );
    });

    println!("📊 Read");
    println!("-------");
    println!("  ReadOrWriteMe = {:?}", proxy.read("ReadOrWriteMe")?);
    println!("  MyArray       = {:?}", proxy.read("MyArray")?);
    println!("  MyDict        = {:?}\n", proxy.read("MyDict")?);

    println!("📊 Write");
    println!("--------");
    proxy.write("ReadOrWriteMe", "VALUE")?;
    println!("  ReadOrWriteMe = {:?}", proxy.read("ReadOrWriteMe")?);
    proxy.write_as("Counter", &Native::from(7), &Signature::UInt32)?;
    println!("  Counter (typed) = {:?}\n", proxy.read_typed("Counter")?);

    println!("📊 Errors");
    println!("---------");
    for name in ["Broken", "Missing"] {
        match proxy.read(name) {
            Ok(value) => println!("  {} = {:?}", name, value),
            Err(e) => println!("  {} -> {}", name, e),
        }
    }
    match ObjectProxy::new(&client, None, PATH).interface("org.hermes.Nope").read_all() {
        Ok(all) => println!("  GetAll = {:?}", all),
        Err(e) => println!("  GetAll -> {}\n", e),
    }

    println!("📊 GetAll");
    println!("---------");
    let all: BTreeMap<String, Native> = proxy.read_all()?;
    for (name, value) in &all {
        println!("  {:<14} {:?}", name, value);
    }
    println!();

    // Pompa client loop sampai dua notifikasi (dua Set) diterima
    println!("📊 Notifications");
    println!("----------------");
    let started = Instant::now();
    while received.load(Ordering::SeqCst) < 2 && started.elapsed() < config.deadline {
        client_loop.run_once(Duration::from_millis(20))?;
    }
    println!("  Received: {}", received.load(Ordering::SeqCst));

    server_handle.quit();
    match server_thread.join() {
        Ok(result) => result?,
        Err(_) => eprintln!("⚠️  server thread panicked"),
    }
    Ok(())
}

fn parse_args() -> DemoConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DemoConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--deadline" | "-d" => {
                if i + 1 < args.len() {
                    config.deadline = Duration::from_millis(args[i + 1].parse().unwrap_or(10_000));
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!("Hermes Props Demo - typed property access over a socketpair\n");
                println!("Usage: hermes_props_demo [OPTIONS]\n");
                println!("Options:");
                println!("  -d, --deadline <MS>   Server loop deadline in ms (default: 10000)");
                println!("  -v, --verbose         Debug logging (RUST_LOG overrides)");
                println!("  -h, --help            Show this help");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}
