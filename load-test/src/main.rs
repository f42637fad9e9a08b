use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target URL (e.g., http://localhost:8080)
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Number of voters to provision and vote with
    #[arg(short = 'n', long, default_value_t = 100)]
    users: usize,

    /// Number of concurrent voters
    #[arg(short, long, default_value_t = 10)]
    concurrency: usize,

    /// Parallel submissions fired for every token; exactly one must be accepted
    #[arg(short = 's', long, default_value_t = 3)]
    submits_per_token: usize,

    /// Admin username
    #[arg(long, default_value = "admin")]
    username: String,

    /// Admin password
    #[arg(short, long, default_value = "password")]
    password: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VotingStatusRequest {
    is_active: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CastVoteRequest<'a> {
    candidate_id: &'a str,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    id: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Voter {
    id: String,
    nisn: String,
    vote_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ImportReport {
    imported: usize,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct VotingStats {
    total_voted: i64,
}

#[derive(Default)]
struct Tally {
    accepted: AtomicUsize,
    rejected: AtomicUsize,
    unexpected: AtomicUsize,
    broken_tokens: AtomicUsize,
}

fn progress(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) {msg}")
            .expect("static progress template")
            .progress_chars("=>-"),
    );
    pb
}

/// CSV roll with a class name unique to this run, so its voters can be found again.
fn roster(run_class: &str, users: usize) -> (String, Vec<String>) {
    let base: u64 = rand::thread_rng().gen_range(1_000_000_000..8_000_000_000);
    let nisns: Vec<String> = (0..users as u64).map(|i| format!("{:010}", base + i)).collect();
    let csv = nisns
        .iter()
        .enumerate()
        .map(|(i, nisn)| format!("Load Test Voter {i},{run_class},{nisn}\n"))
        .collect();
    (csv, nisns)
}

async fn voting_stats(client: &Client, base_url: &str) -> Result<VotingStats> {
    client
        .get(format!("{base_url}/api/admin/voting-stats"))
        .send()
        .await
        .context("Failed to request voting stats")?
        .error_for_status()
        .context("Voting stats request failed")?
        .json()
        .await
        .context("Failed to parse voting stats")
}

async fn verify(client: &Client, base_url: &str, voter_id: &str) -> Result<String> {
    let voter: Voter = client
        .post(format!("{base_url}/api/admin/voters/{voter_id}/verify"))
        .send()
        .await
        .context("Failed to send verify request")?
        .error_for_status()
        .context("Verification failed")?
        .json()
        .await
        .context("Failed to parse verified voter")?;
    voter.vote_token.context("Verified voter has no token")
}

/// Fires several submissions for one token at once and records how many got in.
async fn run_voter(
    client: &Client,
    base_url: &str,
    vote_token: &str,
    candidate_id: &str,
    submits: usize,
    tally: &Tally,
) {
    let url = format!("{base_url}/api/vote/{vote_token}/submit");
    let attempts = (0..submits).map(|_| {
        client
            .post(&url)
            .json(&CastVoteRequest { candidate_id })
            .send()
    });

    let mut accepted_here = 0;
    for result in join_all(attempts).await {
        match result.map(|r| r.status()) {
            Ok(status) if status.is_success() => accepted_here += 1,
            Ok(StatusCode::CONFLICT) => {
                tally.rejected.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                tally.unexpected.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    tally.accepted.fetch_add(accepted_here, Ordering::Relaxed);
    if accepted_here != 1 {
        tally.broken_tokens.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let base_url = args.url.trim_end_matches('/').to_string();

    println!("🚀 Starting load test against {}", base_url);
    println!("👥 Voters: {}", args.users);
    println!("⚡ Concurrency: {}", args.concurrency);
    println!("🔁 Submissions per token: {}", args.submits_per_token);

    let admin = Client::builder()
        .cookie_store(true)
        .build()
        .context("Failed to build admin client")?;

    admin
        .post(format!("{base_url}/api/auth/login"))
        .json(&LoginRequest {
            username: &args.username,
            password: &args.password,
        })
        .send()
        .await
        .context("Failed to send login request")?
        .error_for_status()
        .context("Failed to log in as admin")?;
    println!("🔑 Logged in as {}", args.username);

    let candidates: Vec<Candidate> = admin
        .get(format!("{base_url}/api/candidates"))
        .send()
        .await
        .context("Failed to fetch candidates")?
        .json()
        .await
        .context("Failed to parse candidates")?;
    if candidates.is_empty() {
        bail!("No candidates found on the server. Cannot vote.");
    }
    println!("📋 Found {} candidates", candidates.len());

    let baseline = voting_stats(&admin, &base_url).await?.total_voted;

    // Provision voters through the import endpoint
    let run_class = format!("LT-{:08x}", rand::thread_rng().gen::<u32>());
    let (csv, nisns) = roster(&run_class, args.users);
    let part = Part::text(csv)
        .file_name("load-test.csv")
        .mime_str("text/csv")
        .context("Invalid mime type")?;
    let report: ImportReport = admin
        .post(format!("{base_url}/api/admin/voters/import"))
        .multipart(Form::new().part("file", part))
        .send()
        .await
        .context("Failed to upload voter roll")?
        .error_for_status()
        .context("Voter import failed")?
        .json()
        .await
        .context("Failed to parse import report")?;
    if report.imported != args.users {
        bail!(
            "Imported {} of {} voters: {:?}",
            report.imported,
            args.users,
            report.errors
        );
    }
    println!("📥 Imported {} voters into class {}", report.imported, run_class);

    let voters: Vec<Voter> = admin
        .get(format!("{base_url}/api/admin/voters"))
        .query(&[("status", "unverified"), ("q", run_class.as_str())])
        .send()
        .await
        .context("Failed to list voters")?
        .error_for_status()
        .context("Voter listing failed")?
        .json()
        .await
        .context("Failed to parse voter list")?;
    let voters: Vec<Voter> = voters
        .into_iter()
        .filter(|v| nisns.contains(&v.nisn))
        .collect();
    if voters.len() != args.users {
        bail!("Found {} of {} imported voters", voters.len(), args.users);
    }

    admin
        .post(format!("{base_url}/api/admin/voting-session"))
        .json(&VotingStatusRequest { is_active: true })
        .send()
        .await
        .context("Failed to open voting")?
        .error_for_status()
        .context("Failed to set voting session active")?;
    println!("✅ Voting session is active");

    // Verify every voter
    let pb = progress(voters.len());
    pb.set_message("verifying");
    let tokens: Vec<Result<String>> = stream::iter(voters.iter())
        .map(|voter| {
            let admin = admin.clone();
            let base_url = base_url.clone();
            let pb = pb.clone();
            async move {
                let token = verify(&admin, &base_url, &voter.id).await;
                pb.inc(1);
                token
            }
        })
        .buffer_unordered(args.concurrency)
        .collect()
        .await;
    pb.finish_with_message("verified");
    let tokens = tokens.into_iter().collect::<Result<Vec<String>>>()?;

    // Vote
    let candidates = Arc::new(candidates);
    let tally = Arc::new(Tally::default());
    let pb = progress(tokens.len());
    let start_time = Instant::now();

    stream::iter(tokens)
        .map(|vote_token| {
            let base_url = base_url.clone();
            let candidates = candidates.clone();
            let tally = tally.clone();
            let pb = pb.clone();
            let submits = args.submits_per_token;

            async move {
                let candidate_id = candidates
                    .choose(&mut rand::thread_rng())
                    .map(|c| c.id.clone())
                    .unwrap_or_default();
                match Client::builder().build() {
                    Ok(client) => {
                        run_voter(&client, &base_url, &vote_token, &candidate_id, submits, &tally)
                            .await
                    }
                    Err(_) => {
                        tally.unexpected.fetch_add(submits, Ordering::Relaxed);
                        tally.broken_tokens.fetch_add(1, Ordering::Relaxed);
                    }
                }
                pb.set_message(format!(
                    "accepted: {}",
                    tally.accepted.load(Ordering::Relaxed)
                ));
                pb.inc(1);
            }
        })
        .buffer_unordered(args.concurrency)
        .collect::<Vec<()>>()
        .await;

    pb.finish_with_message("Done");
    let duration = start_time.elapsed();

    let recorded = voting_stats(&admin, &base_url).await?.total_voted - baseline;
    let accepted = tally.accepted.load(Ordering::Relaxed);
    let rejected = tally.rejected.load(Ordering::Relaxed);
    let unexpected = tally.unexpected.load(Ordering::Relaxed);
    let broken = tally.broken_tokens.load(Ordering::Relaxed);

    println!("\n📊 Results:");
    println!("   Time taken: {:?}", duration);
    println!("   Submissions: {}", args.users * args.submits_per_token);
    println!("   Accepted votes: {}", accepted);
    println!("   Rejected as already voted: {}", rejected);
    println!("   Unexpected responses: {}", unexpected);
    println!("   Tokens without exactly one vote: {}", broken);
    println!("   Votes recorded by the server: {}", recorded);
    println!(
        "   Throughput: {:.2} votes/sec",
        accepted as f64 / duration.as_secs_f64()
    );

    if broken > 0 || unexpected > 0 {
        bail!("{broken} token(s) did not end with exactly one accepted vote");
    }
    if recorded != args.users as i64 {
        bail!(
            "server recorded {recorded} new vote(s) for {} voters",
            args.users
        );
    }
    println!("✅ Every voter voted exactly once");

    Ok(())
}
