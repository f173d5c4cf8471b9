//! CLI based tests
use std::process::ExitCode;

use copybench::main as copybench_main;

use rusty_fork::rusty_fork_test;

#[test]
fn show_config_files() {
    assert_eq!(
        copybench_main(["copybench", "--config-files"]),
        ExitCode::SUCCESS
    );
}

#[test]
fn show_config() {
    assert_eq!(
        copybench_main(["copybench", "--show-config", "--strategy", "one-copy"]),
        ExitCode::SUCCESS
    );
}

#[test]
fn bad_option() {
    assert_eq!(
        copybench_main(["copybench", "--this-ridiculous-option-does-not-exist"]),
        ExitCode::FAILURE
    );
}

#[test]
fn bad_strategy() {
    assert_eq!(
        copybench_main(["copybench", "--server", "--strategy", "seven-copy"]),
        ExitCode::FAILURE
    );
}

#[test]
fn wrong_argument_count() {
    assert_eq!(copybench_main(["copybench"]), ExitCode::FAILURE);
    assert_eq!(copybench_main(["copybench", "800000"]), ExitCode::FAILURE);
    assert_eq!(
        copybench_main(["copybench", "800000", "4", "1", "9"]),
        ExitCode::FAILURE
    );
}

rusty_fork_test! {

#[test]
fn client_cannot_connect() {
    let address = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    assert_eq!(
        copybench_main(["copybench", "-q", "--address", address.as_str(), "1000", "2", "1"]),
        ExitCode::FAILURE
    );
}

}
