fn main() {
    if let Err(err) = sleeptrack_lib::run() {
        log::error!("sleeptrack exited with an error: {err:#}");
        std::process::exit(1);
    }
}
