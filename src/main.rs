fn main() {
    if let Err(error) = leaderboard_core_lib::run() {
        eprintln!("leaderboard-core: {error}");
        std::process::exit(1);
    }
}
