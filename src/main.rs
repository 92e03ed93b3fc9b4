fn main() {
    if let Err(e) = camguard_lib::run() {
        eprintln!("camguard: {:#}", e);
        std::process::exit(1);
    }
}
