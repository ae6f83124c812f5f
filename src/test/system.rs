//! End-to-end scenarios over loopback TCP: scripted workers for routing
//! behavior, and a real worker driving rustc for the full pipeline.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use crate::compiler::Language;
use crate::errors::*;
use crate::producer::{JobResult, Producer, Token, MAX_CODE_LEN};
use crate::test::{spawn_scripted_worker, spawn_vanishing_worker, wait_for};
use crate::worker::Worker;

const RESULT_WAIT: Duration = Duration::from_secs(60);
const WORKER_WAIT: Duration = Duration::from_secs(10);

fn local_producer() -> Producer {
    Producer::bind("127.0.0.1:0").unwrap()
}

fn next_result(producer: &Producer) -> JobResult {
    producer
        .next_result_timeout(RESULT_WAIT)
        .unwrap()
        .expect("no result arrived in time")
}

#[test]
fn dispatch_without_worker_then_register() {
    let producer = local_producer();

    let err = producer.dispatch(Language::Rust, "fn main() {}").unwrap_err();
    match err.kind() {
        ErrorKind::NoWorkerAvailable(Language::Rust) => {}
        other => panic!("expected NoWorkerAvailable, got {:?}", other),
    }

    let _ = spawn_scripted_worker(producer.local_addr(), Language::Rust, |_| true);
    assert!(producer.await_worker_timeout(Language::Rust, WORKER_WAIT));

    let token = producer.dispatch(Language::Rust, "fn main() {}").unwrap();
    let result = next_result(&producer);
    assert_eq!(result.token, token);
    assert!(result.success);
}

#[test]
fn results_keep_dispatch_order_on_one_worker() {
    let producer = local_producer();
    let _ = spawn_scripted_worker(producer.local_addr(), Language::C, |code| !code.contains("oops"));
    assert!(producer.await_worker_timeout(Language::C, WORKER_WAIT));

    let jobs = ["int main() { return 0; }", "int main() { oops }", "int main() { return 2; }"];
    let tokens: Vec<Token> = jobs
        .iter()
        .map(|code| producer.dispatch(Language::C, code).unwrap())
        .collect();

    // Distinct inputs to one worker must yield distinct tokens.
    assert_eq!(tokens.len(), 3);
    assert_ne!(tokens[0], tokens[1]);
    assert_ne!(tokens[1], tokens[2]);
    assert_ne!(tokens[0], tokens[2]);

    let results: Vec<JobResult> = (0..3).map(|_| next_result(&producer)).collect();
    let result_tokens: Vec<Token> = results.iter().map(|r| r.token.clone()).collect();
    assert_eq!(result_tokens, tokens);
    let successes: Vec<bool> = results.iter().map(|r| r.success).collect();
    assert_eq!(successes, vec![true, false, true]);
    assert!(!results[1].output.is_empty());
}

#[test]
fn two_languages_multiplex_on_one_channel() {
    let producer = local_producer();
    let _ = spawn_scripted_worker(producer.local_addr(), Language::C, |_| true);
    let _ = spawn_scripted_worker(producer.local_addr(), Language::Rust, |_| true);
    assert!(producer.await_worker_timeout(Language::C, WORKER_WAIT));
    assert!(producer.await_worker_timeout(Language::Rust, WORKER_WAIT));

    let c_token = producer
        .dispatch(Language::C, "#include \"stdio.h\"\nint main() { return 0;}")
        .unwrap();
    let rust_token = producer
        .dispatch(Language::Rust, "fn main() { println!(\"Hello, world\"); }")
        .unwrap();
    assert_ne!(c_token, rust_token);

    // Results may interleave across workers in any order.
    let mut seen: HashMap<Token, bool> = HashMap::new();
    for _ in 0..2 {
        let result = next_result(&producer);
        seen.insert(result.token.clone(), result.success);
    }
    assert_eq!(seen.len(), 2);
    assert_eq!(seen.get(&c_token), Some(&true));
    assert_eq!(seen.get(&rust_token), Some(&true));
}

#[test]
fn dead_worker_fails_its_inflight_jobs_in_order() {
    let producer = local_producer();
    let _ = spawn_vanishing_worker(producer.local_addr(), Language::Cpp, 2);
    assert!(producer.await_worker_timeout(Language::Cpp, WORKER_WAIT));

    let first = producer.dispatch(Language::Cpp, "int main() { return 1; }").unwrap();
    let second = producer.dispatch(Language::Cpp, "int main() { return 2; }").unwrap();

    let results: Vec<JobResult> = (0..2).map(|_| next_result(&producer)).collect();
    assert_eq!(results[0].token, first);
    assert_eq!(results[1].token, second);
    assert!(results.iter().all(|r| !r.success));
    assert!(!results[0].output.is_empty());

    wait_for("dead worker to leave the roster", || {
        producer.registered_workers(Language::Cpp) == 0
    });
}

#[test]
fn rosters_are_per_language() {
    let producer = local_producer();
    let _ = spawn_scripted_worker(producer.local_addr(), Language::C, |_| true);
    let _ = spawn_scripted_worker(producer.local_addr(), Language::Cpp, |_| true);
    assert!(producer.await_worker_timeout(Language::C, WORKER_WAIT));
    assert!(producer.await_worker_timeout(Language::Cpp, WORKER_WAIT));

    assert_eq!(producer.registered_workers(Language::C), 1);
    assert_eq!(producer.registered_workers(Language::Cpp), 1);
    assert_eq!(producer.registered_workers(Language::Rust), 0);

    // A roster for one language never serves another.
    let err = producer.dispatch(Language::Rust, "fn main() {}").unwrap_err();
    match err.kind() {
        ErrorKind::NoWorkerAvailable(Language::Rust) => {}
        other => panic!("expected NoWorkerAvailable, got {:?}", other),
    }
}

#[test]
fn oversized_request_is_refused_before_routing() {
    let producer = local_producer();
    let huge = "a".repeat(MAX_CODE_LEN + 1);
    let err = producer.dispatch(Language::C, &huge).unwrap_err();
    match err.kind() {
        ErrorKind::RequestTooLarge(len, max) => {
            assert_eq!(*len, MAX_CODE_LEN + 1);
            assert_eq!(*max, MAX_CODE_LEN);
        }
        other => panic!("expected RequestTooLarge, got {:?}", other),
    }
}

// Full pipeline against the one toolchain `cargo test` guarantees. The good,
// broken, and wrong-language programs exercise the same driver rows a C
// worker would, via rustc.
#[test]
fn end_to_end_with_a_real_rust_worker() {
    let producer = local_producer();
    let addr = producer.local_addr();
    let _ = thread::spawn(move || {
        let _ = Worker::new(Language::Rust, addr)
            .version("test toolchain")
            .run_session();
    });
    assert!(producer.await_worker_timeout(Language::Rust, WORKER_WAIT));

    let good = producer
        .dispatch(Language::Rust, "fn main() { println!(\"Hello, world\"); }")
        .unwrap();
    let broken = producer
        .dispatch(Language::Rust, "fn main() { let x: () = 1; }")
        .unwrap();
    // A C++ program routed to the Rust toolchain must fail, not wedge.
    let wrong = producer
        .dispatch(
            Language::Rust,
            "using namespace std;\n#include <iostream>\nint main(){cout<<\"hi\"<<endl;}",
        )
        .unwrap();

    let results: Vec<JobResult> = (0..3).map(|_| next_result(&producer)).collect();
    assert_eq!(results[0].token, good);
    assert!(results[0].success);

    assert_eq!(results[1].token, broken);
    assert!(!results[1].success);
    assert!(!results[1].output.is_empty());

    assert_eq!(results[2].token, wrong);
    assert!(!results[2].success);
}
