//! Integration tests for the dynamic queue model.
//!
//! The loop bodies below run inside forked worker processes, so results are
//! accumulated through an append-mode file: single short appends are atomic,
//! and the parent reads the file only after every worker has exited.

#![cfg(unix)]

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use parloop::{CancelToken, Error, PforOptions, pfor};

// Forking from a threaded test harness is safe here (children only touch
// their own memory and the shared cursor), but serializing the tests keeps
// their worker pools and stderr output apart.
static SERIAL: Mutex<()> = Mutex::new(());

fn quiet() -> PforOptions {
    PforOptions {
        // Pinned so the dying-worker test keeps survivors even on one CPU.
        process_count: Some(4),
        show_progress: false,
        acknowledge_isolation: true,
        ..Default::default()
    }
}

fn read_numbers(path: &std::path::Path) -> Vec<i64> {
    let mut numbers: Vec<i64> = std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.parse().unwrap())
        .collect();
    numbers.sort_unstable();
    numbers
}

/// Every element is processed by exactly one worker; the parent sees the
/// full set of squares once the loop ends.
#[test]
fn test_squares_through_shared_file() {
    let _guard = SERIAL.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("squares.txt");
    let out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .unwrap();

    for x in pfor((0..10i64).collect(), quiet()).unwrap() {
        let line = format!("{}\n", x * x);
        (&out).write_all(line.as_bytes()).unwrap();
    }

    let mut expected: Vec<i64> = (0..10).map(|x| x * x).collect();
    expected.sort_unstable();
    assert_eq!(read_numbers(&path), expected);
}

/// A body that panics on one element kills only its own worker; the
/// surviving workers drain the rest of the queue.
#[test]
fn test_one_dying_worker_does_not_stop_the_rest() {
    let _guard = SERIAL.lock().unwrap();
    let _ = tracing_subscriber::fmt::try_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quotients.txt");
    let out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .unwrap();

    for x in pfor((0..10i64).collect(), quiet()).unwrap() {
        // Divides by zero on the first element, killing that worker.
        let quotient = 100 / x;
        let line = format!("{quotient}\n");
        (&out).write_all(line.as_bytes()).unwrap();
    }

    let mut expected: Vec<i64> = (1..10).map(|x| 100 / x).collect();
    expected.sort_unstable();
    assert_eq!(read_numbers(&path), expected);
}

/// Firing the cancel token kills the remaining workers instead of waiting
/// out their elements.
#[test]
fn test_cancellation_kills_workers() {
    let _guard = SERIAL.lock().unwrap();
    let token = CancelToken::new();
    let canceller = token.clone();
    // Spawned before the fork, so it exists only in the parent.
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        canceller.cancel();
    });

    let started = Instant::now();
    let options = PforOptions {
        process_count: Some(4),
        cancel: token,
        ..quiet()
    };
    for _x in pfor((0..8i64).collect(), options).unwrap() {
        // Each claimed element would take far longer than the test allows;
        // only a kill can end this loop.
        thread::sleep(Duration::from_secs(600));
    }
    handle.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(30));
}

/// An empty backlog ends the loop immediately without forking workers.
#[test]
fn test_empty_input() {
    let _guard = SERIAL.lock().unwrap();
    let mut seen = 0;
    for _x in pfor(Vec::<i64>::new(), quiet()).unwrap() {
        seen += 1;
    }
    assert_eq!(seen, 0);
}

/// Configuration mistakes surface before any process is forked.
#[test]
fn test_zero_process_count_rejected() {
    let options = PforOptions {
        process_count: Some(0),
        ..quiet()
    };
    assert!(matches!(
        pfor(vec![1], options),
        Err(Error::Configuration(_))
    ));
}
