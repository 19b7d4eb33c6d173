fn main() {
    #[cfg(feature = "cli")]
    jpegdelta::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("jpegdelta: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
