//! 长轮询同步演示
//!
//! 展示完整的多流回路：挂起的 poll 被回执与输入状态的推进唤醒

use std::sync::Arc;

use privchat_syncapi::storage::{SqliteReceiptStore, TypingCache};
use privchat_syncapi::sync::{
    ReceiptStreamProvider, StreamProvider, SyncEngine, SyncEngineConfig, TypingStreamProvider,
};
use privchat_syncapi::types::{Device, Membership};
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("========================================");
    println!("多流长轮询同步演示");
    println!("========================================\n");

    // === 1. 打开存储并搭建引擎 ===

    let data_dir = std::env::temp_dir().join("privchat_syncapi_demo");
    std::fs::create_dir_all(&data_dir)?;
    let store = Arc::new(SqliteReceiptStore::open(data_dir.join("receipts.db"))?);
    let cache = Arc::new(TypingCache::default());

    let receipt_provider = Arc::new(ReceiptStreamProvider::new(store.clone()));
    let typing_provider = Arc::new(TypingStreamProvider::new(cache.clone()));

    let mut engine = SyncEngine::new(SyncEngineConfig::default());
    engine.register(receipt_provider.clone());
    engine.register(typing_provider.clone());
    engine.setup().await;
    let engine = Arc::new(engine);
    println!("✅ 引擎就绪，当前令牌 {}\n", engine.current_token());

    // === 2. 挂起一个长轮询 ===

    let since = engine.current_token();
    let poll_handle = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut request = engine
                .new_request(
                    Device::new("@alice:example.org", "PHONE"),
                    since,
                    Some(Duration::from_secs(10)),
                )
                .with_room("!demo:example.org", Membership::Join);
            let next = engine.poll(&mut request).await;
            (next, request.response)
        })
    };
    println!("⏳ @alice 的长轮询已挂起，等待新数据...");

    // === 3. 灌入一条回执和一条输入状态 ===

    sleep(Duration::from_millis(300)).await;

    println!("🧾 @bob 读到了 $event_42，写入回执...");
    let receipt_position = store.store_receipt(
        "!demo:example.org",
        "$event_42",
        "@bob:example.org",
        chrono::Utc::now().timestamp_millis(),
    )?;

    println!("⌨️  @bob 开始输入...");
    let typing_position = cache.add_typing_user("@bob:example.org", "!demo:example.org", None);

    // 数据都落好了再推进，挂起的 poll 一次醒来拿到两类增量
    typing_provider.advance(typing_position);
    receipt_provider.advance(receipt_position);

    // === 4. 收割响应 ===

    let (next, response) = poll_handle.await?;
    let next = next?;

    println!("\n========================================");
    println!("本轮送达的增量");
    println!("========================================\n");
    println!("{}", serde_json::to_string_pretty(&response)?);
    println!("\n✅ next_batch: {}", next);

    // === 5. 用新令牌立即再问一次 ===

    let mut request = engine
        .new_request(
            Device::new("@alice:example.org", "PHONE"),
            next,
            Some(Duration::ZERO),
        )
        .with_room("!demo:example.org", Membership::Join);
    let again = engine.poll(&mut request).await?;
    if request.response.is_empty() {
        println!("✅ 已追平，零超时的 poll 原地返回 {}", again);
    } else {
        println!("⚠️  追平后仍有增量: {:?}", request.response);
    }

    // === 6. 过期清扫 ===

    match cache.sweep_expired() {
        Some(swept) => {
            typing_provider.advance(swept);
            println!("🧹 清扫过期输入状态，位置推进到 {}", swept);
        }
        None => println!("🧹 无过期输入状态可清扫"),
    }

    let stats = engine.get_stats();
    println!(
        "\n📊 引擎统计: served={} wake_ups={} empty_rounds={} timeouts={}",
        stats.polls_served, stats.wake_ups, stats.empty_rounds, stats.timeouts
    );

    println!("\n✅ 演示完成！");

    Ok(())
}
