//! Collects the five result streams into `query_<k>_results.csv`
//! files, one EOF per stream, then stops.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use reelgrid_core::comm;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(crate) const QUERY_RESULTS_HEADERS: [&str; 5] = [
    "id,title,genres",
    "country,investment",
    "id,title,avg_rating",
    "actor,participation",
    "sentiment,avg_rate_revenue_budget",
];

pub(crate) struct ResultsReceiver {
    client_id: String,
    server_ip: String,
    server_port: u16,
    results_dir: PathBuf,
    shutdown: CancellationToken,
    result_files: HashMap<usize, File>,
}

impl ResultsReceiver {
    pub(crate) fn new(
        client_id: String,
        server_ip: String,
        server_port: u16,
        results_dir: PathBuf,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client_id,
            server_ip,
            server_port,
            results_dir,
            shutdown,
            result_files: HashMap::new(),
        }
    }

    fn result_file(&mut self, num_query: usize) -> anyhow::Result<&mut File> {
        if !self.result_files.contains_key(&num_query) {
            let path = self
                .results_dir
                .join(format!("query_{num_query}_results.csv"));
            let mut file = File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            writeln!(file, "{}", QUERY_RESULTS_HEADERS[num_query - 1])?;
            self.result_files.insert(num_query, file);
        }
        Ok(self.result_files.get_mut(&num_query).expect("just inserted"))
    }

    fn write_result(&mut self, num_query: usize, result: &str) -> anyhow::Result<()> {
        let file = self.result_file(num_query)?;
        writeln!(file, "{result}")?;
        file.flush()?;
        Ok(())
    }

    pub(crate) async fn run(mut self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.results_dir)?;
        let server_ip = self.server_ip.clone();
        let mut socket =
            super::sender::connect_with_retry(&server_ip, self.server_port, "results socket")
                .await?;
        comm::write_frame(&mut socket, &self.client_id)
            .await
            .context("echoing the client id")?;

        let started = Instant::now();
        let mut resolved = 0usize;
        loop {
            let row = tokio::select! {
                _ = self.shutdown.cancelled() => bail!("shutdown during result collection"),
                row = comm::read_lines(&mut socket) => row.context("receiving results")?,
            };
            let Some((num_query, results)) = row.split_first() else {
                warn!("empty result row");
                continue;
            };
            let num_query: usize = num_query
                .parse()
                .with_context(|| format!("malformed query number: {num_query}"))?;
            if num_query == 0 || num_query > QUERY_RESULTS_HEADERS.len() {
                warn!(num_query, "result row for an unknown query");
                continue;
            }
            for result in results {
                if result == comm::EOF_MESSAGE {
                    // Touch the file so resolved-but-empty queries still
                    // leave their header behind.
                    self.result_file(num_query)?;
                    self.result_files.remove(&num_query);
                    resolved += 1;
                    info!(
                        num_query,
                        elapsed_seconds = started.elapsed().as_secs_f64(),
                        "query resolved"
                    );
                    if resolved == QUERY_RESULTS_HEADERS.len() {
                        info!("all queries resolved");
                        return Ok(());
                    }
                } else {
                    self.write_result(num_query, result)?;
                }
            }
        }
    }
}
