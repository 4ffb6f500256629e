fn main() {
    smlm_pipeline::cli::run();
}
