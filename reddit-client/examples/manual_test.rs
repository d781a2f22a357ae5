use autoreply_core::{ItemKind, Platform};
use reddit_client::{RedditClient, RedditOAuth2Config};
use std::io::{self, Write};

fn prompt(label: &str) -> io::Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut value = String::new();
    io::stdin().read_line(&mut value)?;
    Ok(value.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Reddit API Manual Test ===\n");

    println!("📋 Setup Instructions:");
    println!("1. Go to https://www.reddit.com/prefs/apps");
    println!("2. Create a new app (type: 'script')");
    println!("3. Use the client ID and secret below with the bot account's login\n");

    let client_id = prompt("Enter Reddit Client ID")?;
    let client_secret = prompt("Enter Reddit Client Secret")?;
    let username = prompt("Enter Reddit username")?;
    let password = prompt("Enter Reddit password")?;

    if client_id.is_empty() || client_secret.is_empty() || username.is_empty() {
        println!("❌ Client ID, secret and username are required.");
        return Ok(());
    }

    let user_agent = format!("autoreply-manual-test/1.0 (by u/{})", username);
    let config = RedditOAuth2Config::new(client_id, client_secret, username, password, user_agent);
    let client = RedditClient::new(config)?;
    println!("✅ Reddit client created, auth state: {:?}\n", client.get_auth_state());

    println!("👤 Logging in...");
    match client.authenticate().await {
        Ok(identity) => println!("✅ Logged in as {}\n", identity),
        Err(e) => {
            println!("❌ Authentication failed: {}", e);
            return Ok(());
        }
    }

    let subreddit = prompt("Subreddit to inspect (without r/)")?;
    let subreddit = if subreddit.is_empty() { "test".to_string() } else { subreddit };

    println!("\n📰 Newest submissions in r/{}...", subreddit);
    let submissions = client.fetch_new(&subreddit, ItemKind::Submission, 5).await?;
    for (i, item) in submissions.iter().enumerate() {
        println!("   {}. {} by {:?}", i + 1, item.permalink_url(), item.author());
    }

    if let Some(first) = submissions.first() {
        println!("\n🌳 Expanding replies under {}...", first.fullname());
        match client.expand_replies(first).await {
            Ok(tree) => println!("✅ {} replies loaded", tree.len()),
            Err(e) => println!("❌ Failed to expand replies: {}", e),
        }
    }

    println!("\n💬 Newest comments in r/{}...", subreddit);
    let comments = client.fetch_new(&subreddit, ItemKind::Comment, 5).await?;
    for item in &comments {
        if let Some(comment) = item.as_comment() {
            match client.parent_of(comment).await {
                Ok(parent) => println!("   {} replies to {}", comment.fullname, parent.fullname()),
                Err(e) => println!("   {} parent lookup failed: {}", comment.fullname, e),
            }
        }
    }

    println!("\n🎉 Manual test completed (nothing was posted).");
    Ok(())
}
