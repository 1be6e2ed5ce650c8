fn main() {
    cli_batteries::run(env!("CARGO_BIN_NAME"), queue_coordinator::async_main);
}
