fn main() {
    if let Err(err) = tall_ingester::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
