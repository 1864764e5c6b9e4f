//! changeset - Record changes and release new versions.

fn main() -> std::process::ExitCode {
    changesets::cmd::main()
}
