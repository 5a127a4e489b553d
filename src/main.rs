fn main() {
    if let Err(error) = market_sync_lib::run() {
        eprintln!("market-sync-desktop: {error}");
        std::process::exit(1);
    }
}
