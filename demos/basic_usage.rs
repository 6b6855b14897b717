// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic tiered-cache usage example.
//!
//! Demonstrates:
//! 1. Building the cache (in-memory stores, or Redis + SQL when configured)
//! 2. Read-through: backing store, then distant tier, then near tier
//! 3. Warmer promotion after three ticks
//! 4. Eviction once the ranking passes `max_items`
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! # Self-contained, no backends needed
//! cargo run --example basic_usage
//!
//! # Against real backends
//! TIERED_CACHE_REDIS_URL=redis://localhost:6379 \
//! TIERED_CACHE_SQL_URL=sqlite://demo.db?mode=rwc \
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tiered_cache::{
    BackingStore, InMemoryBackingStore, InMemoryDistantStore, InMemoryLock, Product, SqlProductStore,
    TieredCache, TieredCacheConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiered_cache=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           tiered-cache: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Build the cache
    // ─────────────────────────────────────────────────────────────────────────
    let catalogue: Vec<Product> = (1..=8)
        .map(|i| Product::new(i.to_string(), format!("Widget #{i}"), 4.5 * i as f64, 10 * i))
        .collect();

    let config = TieredCacheConfig {
        redis_url: std::env::var("TIERED_CACHE_REDIS_URL").ok(),
        sql_url: std::env::var("TIERED_CACHE_SQL_URL").ok(),
        // Small threshold so the demo can show a pass
        max_items: 20,
        remove_rate: 0.25,
        ..Default::default()
    };

    let cache = match (&config.redis_url, &config.sql_url) {
        (Some(_), Some(sql_url)) => {
            println!("📦 Connecting to Redis and SQL...");
            let seed = SqlProductStore::new(sql_url).await?;
            for product in &catalogue {
                if seed.get_by_id(&product.id).await?.is_none() {
                    seed.insert(product).await?;
                }
            }
            TieredCache::connect(config).await?
        }
        _ => {
            println!("📦 Using in-memory stores (set TIERED_CACHE_REDIS_URL and TIERED_CACHE_SQL_URL for real backends)");
            let backing: InMemoryBackingStore = catalogue.iter().cloned().collect();
            TieredCache::from_parts(
                config,
                Arc::new(InMemoryDistantStore::new()),
                Arc::new(backing),
                Arc::new(InMemoryLock::new("DELETE")),
            )?
        }
    };
    println!("   State: {}", cache.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Read-through
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔎 Reading product 1 three times...");
    for attempt in 1..=3 {
        match cache.get_with_tier("1").await? {
            Some((product, tier)) => {
                println!("   └─ read {attempt}: {} ({:.2}) served by {tier}", product.name, product.price)
            }
            None => println!("   └─ read {attempt}: not found"),
        }
    }
    println!("   └─ unknown id: {:?}", cache.get_by_id("does-not-exist").await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Warmer
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔥 Reading products 2..=4, then running three warmer ticks...");
    for id in ["2", "3", "4"] {
        cache.get_by_id(id).await?;
    }
    for _ in 0..3 {
        println!("   └─ {:?}", cache.warm_now().await?);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Eviction
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🧹 Ranking 30 ids against a threshold of {}...", cache.eviction().max_items());
    for i in 100..130 {
        cache.tracker().upsert(&i.to_string(), i as f64).await?;
    }
    println!("   └─ ranking size before: {}", cache.tracker().count().await?);
    println!("   └─ {:?}", cache.evict_now().await?);
    println!("   └─ ranking size after:  {}", cache.tracker().count().await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    cache.shutdown().await;
    println!("   ✅ Shutdown complete! State: {}", cache.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters");
        for (name, value) in &counters {
            println!("   │  └─ {} = {}", name, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges");
        for (name, value) in &gauges {
            println!("   │  └─ {} = {:.2}", name, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms");
        for (name, count, sum) in &histograms {
            println!("      └─ {} count={} sum={:.6}s", name, count, sum);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
