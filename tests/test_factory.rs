//! Lifecycle tests for the random number factory's single-instance guard.
//!
//! These run in their own process and construct factories directly, so they
//! deliberately avoid `random::factory::global()`, and are folded into one
//! test function so no two factories are ever constructed concurrently.

use std::time::Duration;

use gendist::error::GeneticError;
use gendist::random::{FactoryOptions, RandomFactory};

#[test]
fn test_factory_lifecycle_and_instance_guard() {
    let options = FactoryOptions {
        producer_threads: 1,
        packet_size: 256,
        buffer_capacity: 8,
        checkout_timeout: Duration::from_millis(100),
        min_unique_seeds: 64,
    };

    // First instance comes up and produces usable packets.
    let factory = RandomFactory::new(options.clone()).unwrap();
    let mut packet = factory.checkout_packet();
    assert_eq!(packet.size(), 256);
    let mut count = 0;
    while let Some(v) = packet.next() {
        assert!((0.0..1.0).contains(&v));
        count += 1;
    }
    assert_eq!(count, 256);

    // A second concurrent instance is rejected with a configuration error.
    let err = RandomFactory::new(options.clone()).unwrap_err();
    assert!(matches!(err, GeneticError::Configuration(_)));

    // Scaling the pool works while running.
    factory.set_producer_threads(3).unwrap();
    assert_eq!(factory.producer_threads(), 3);

    // Dropping the instance releases the guard; a new factory can start.
    drop(factory);
    let second = RandomFactory::new(options).unwrap();
    let _ = second.checkout_packet();

    // Seeds forwarded from the owned seed manager are decorrelated.
    let seeds: Vec<u32> = (0..64).map(|_| second.seed()).collect();
    let unique: std::collections::HashSet<&u32> = seeds.iter().collect();
    assert_eq!(unique.len(), seeds.len());
}
