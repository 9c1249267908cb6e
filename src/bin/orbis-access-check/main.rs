use orbis_access::{credentials_from_value, evaluate, ContextRecord, Identity};
use serde_json::Value;

const GRANTED: i32 = 0;
const DENIED: i32 = 1;
const USAGE_ERROR: i32 = 2;
const INPUT_ERROR: i32 = 3;

fn usage() {
    eprintln!("Usage: orbis-access-check <context.json> <credentials.json> [did]");
    eprintln!();
    eprintln!("Prints granted (exit {}) or denied (exit {}).", GRANTED, DENIED);
    eprintln!(
        "Exits {} on usage errors, {} on unreadable input or evaluation errors.",
        USAGE_ERROR, INPUT_ERROR
    );
}

fn fail(message: String) -> ! {
    eprintln!("{}", message);
    std::process::exit(INPUT_ERROR);
}

fn read_json<T: serde::de::DeserializeOwned>(filename: &str) -> T {
    let data = match std::fs::read_to_string(filename) {
        Err(err) => fail(format!("Unable to read {}: {}", filename, err)),
        Ok(data) => data,
    };
    match serde_json::from_str(&data) {
        Err(err) => fail(format!("Unable to parse {}: {}", filename, err)),
        Ok(value) => value,
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 && args.len() != 4 {
        usage();
        std::process::exit(USAGE_ERROR);
    }
    let context: ContextRecord = read_json(&args[1]);
    let credentials: Value = read_json(&args[2]);
    if !credentials.is_array() {
        fail(format!("Expected an array of credentials in {}", args[2]));
    }
    let credentials = credentials_from_value(&credentials);
    let identity = args.get(3).map(Identity::new);

    match evaluate(&credentials, &context.access_rules(), identity.as_ref()) {
        Ok(true) => println!("granted"),
        Ok(false) => {
            println!("denied");
            std::process::exit(DENIED);
        }
        Err(err) => fail(format!("Unable to evaluate access: {}", err)),
    }
}
