//! Crawl controller: district → page enumeration with checkpointed resume,
//! per-record assembly, and a bounded whole-crawl retry boundary.

use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use scraper::Html;
use tracing::{info, warn};

use crate::certificate;
use crate::client::{District, RegistrySource};
use crate::parser::project::{self, ProjectDetails, ProjectRecord};
use crate::sink::{CsvSink, Record};
use crate::state::{Checkpoint, StateFile};

const PAGE_DELAY: Duration = Duration::from_millis(750);
const CRAWL_RETRY_DELAY: Duration = Duration::from_secs(5);
const CRAWL_MAX_RETRIES: u32 = 10;

/// Terminal state of a crawl run. Exhausting the retry budget ends the run
/// without error; the checkpoint already reflects the last committed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    Completed,
    RetriesExhausted,
}

pub struct Crawler<S> {
    source: S,
    state: StateFile,
    sink: CsvSink,
    page_delay: Duration,
    retry_delay: Duration,
    max_retries: u32,
}

impl<S: RegistrySource> Crawler<S> {
    pub fn new(source: S, state: StateFile, sink: CsvSink) -> Self {
        Self {
            source,
            state,
            sink,
            page_delay: PAGE_DELAY,
            retry_delay: CRAWL_RETRY_DELAY,
            max_retries: CRAWL_MAX_RETRIES,
        }
    }

    /// Run the crawl to completion, retrying the whole crawl a bounded number
    /// of times on unexpected failure. Progress survives across attempts via
    /// the checkpoint, so a retry resumes rather than restarts.
    pub async fn run(&mut self) -> Result<CrawlOutcome> {
        let mut attempts = 0;
        loop {
            match self.crawl_once().await {
                Ok(()) => return Ok(CrawlOutcome::Completed),
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.max_retries {
                        warn!("crawl failed after {attempts} attempts, giving up: {e:#}");
                        return Ok(CrawlOutcome::RetriesExhausted);
                    }
                    warn!(
                        "crawl attempt {attempts}/{} failed: {e:#}; retrying in {}s",
                        self.max_retries,
                        self.retry_delay.as_secs()
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn crawl_once(&mut self) -> Result<()> {
        let mut districts = self.source.districts().await?;
        // the alphabetical resume-skip rule requires alphabetical iteration
        districts.sort_by_key(|d| d.name.to_uppercase());
        info!("crawling {} districts", districts.len());

        let checkpoint = self.state.load();
        if !checkpoint.is_sentinel() {
            info!(
                "resuming from district '{}', page {}",
                checkpoint.current_district, checkpoint.current_page
            );
        }

        for district in &districts {
            if !checkpoint.is_sentinel()
                && district.name.to_uppercase() < checkpoint.current_district.to_uppercase()
            {
                info!("skipping '{}' (already processed)", district.name);
                continue;
            }
            self.crawl_district(district, &checkpoint).await?;
        }
        Ok(())
    }

    async fn crawl_district(&mut self, district: &District, startup: &Checkpoint) -> Result<()> {
        // The page guard applies only to the district named by the
        // checkpoint; any other district starts fresh at page 0.
        let resuming = startup.current_page >= 0
            && district
                .name
                .eq_ignore_ascii_case(&startup.current_district);

        let (committed_page, total_pages) = if resuming {
            info!(
                "resuming '{}' after page {} of {}",
                district.name, startup.current_page, startup.total_pages
            );
            (startup.current_page, startup.total_pages)
        } else {
            let doc = self.fetch_results(district, 0).await?;
            let total = project::total_pages(&doc);
            info!("'{}': {} pages", district.name, total);
            let records = self.assemble_page(&doc).await?;
            self.sink.append(&records)?;
            self.state.save(&district.name, 0, total)?;
            (0, total)
        };

        let bar = page_bar(&district.name, total_pages, committed_page);
        for page in 0..total_pages {
            if page <= committed_page {
                continue;
            }
            let doc = self.fetch_results(district, page).await?;
            let records = self.assemble_page(&doc).await?;
            self.sink.append(&records)?;
            self.state.save(&district.name, page, total_pages)?;
            bar.inc(1);
            // politeness delay, only when another page follows
            if page + 1 < total_pages {
                tokio::time::sleep(self.page_delay).await;
            }
        }
        bar.finish_and_clear();

        // done marker; the next district's first save overwrites it
        self.state.save(&district.name, -1, 0)?;
        info!("'{}' complete", district.name);
        Ok(())
    }

    async fn fetch_results(&self, district: &District, page: i32) -> Result<Html> {
        let html = self.source.results_page(district, page).await?;
        Ok(Html::parse_document(&html))
    }

    /// Assemble one record per project row. Field extraction never fails a
    /// record; the certificate step is optional and only ever drops its own
    /// fields.
    async fn assemble_page(&self, doc: &Html) -> Result<Vec<Record>> {
        let rows = project::parse_results_rows(doc);
        let mut records = Vec::with_capacity(rows.len());

        for row in rows {
            let details = match &row.details_href {
                Some(href) => {
                    let html = self.source.detail_page(href).await?;
                    project::extract_project_details(&Html::parse_document(&html))
                }
                None => {
                    warn!("'{}' has no detail link", row.project_name);
                    ProjectDetails::default()
                }
            };

            let mut record = ProjectRecord {
                project_name: row.project_name,
                promoter_name: row.promoter_name,
                last_modified: row.last_modified,
                details,
                certificate_name: None,
                certificate_date: None,
            };

            if let Some(cert) = &row.certificate {
                record.certificate_name = Some(cert.doc_name.clone());
                match self.source.certificate(&cert.qstr).await {
                    Ok(payload) => match certificate::certificate_date(&payload) {
                        Ok(date) => record.certificate_date = Some(date),
                        Err(e) => warn!(
                            "certificate decode failed for '{}': {e:#}",
                            record.project_name
                        ),
                    },
                    Err(e) => warn!(
                        "certificate fetch failed for '{}': {e:#}",
                        record.project_name
                    ),
                }
            }

            records.push(record.fields());
        }

        Ok(records)
    }
}

fn page_bar(district: &str, total_pages: i32, committed_page: i32) -> ProgressBar {
    let bar = ProgressBar::new(total_pages.max(0) as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message(district.to_string());
    bar.set_position((committed_page + 1).max(0) as u64);
    bar
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;

    fn results_html(district: &str, page: i32, total: i32) -> String {
        format!(
            r##"<html><body>
            <div><label>Total Pages :</label> {total} </div>
            <table>
              <tr><th>Sr</th><th>Name</th><th>Promoter</th><th>Date</th><th>Details</th></tr>
              <tr>
                <td>1</td><td>{district}-P{page}</td><td>Promoter</td><td>01/01/2024</td>
                <td><b><a href="SearchList/ViewDetails?d={district}&p={page}">View</a></b></td>
                <td>Registered</td>
                <td><b><a href="#">Upload</a><a href="#" data-docname="cert-{page}.pdf" data-qstr="Q{page}">View</a></b></td>
              </tr>
            </table>
            </body></html>"##
        )
    }

    const DETAIL_HTML: &str = r#"<html><body>
        <div><label>District</label></div><div>Somewhere</div>
    </body></html>"#;

    struct MockRegistry {
        districts: Vec<District>,
        total_pages: i32,
        fetched: Mutex<Vec<(String, i32)>>,
        /// (district, page) pairs that fail exactly once
        poison: Mutex<HashSet<(String, i32)>>,
    }

    impl MockRegistry {
        fn new(names: &[&str], total_pages: i32) -> Self {
            let districts = names
                .iter()
                .enumerate()
                .map(|(i, name)| District {
                    id: i as i64 + 1,
                    name: name.to_string(),
                })
                .collect();
            Self {
                districts,
                total_pages,
                fetched: Mutex::new(Vec::new()),
                poison: Mutex::new(HashSet::new()),
            }
        }

        fn poison_page(self, district: &str, page: i32) -> Self {
            self.poison
                .lock()
                .unwrap()
                .insert((district.to_string(), page));
            self
        }

        fn fetched(&self) -> Vec<(String, i32)> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RegistrySource for MockRegistry {
        async fn districts(&self) -> Result<Vec<District>> {
            Ok(self.districts.clone())
        }

        async fn results_page(&self, district: &District, page: i32) -> Result<String> {
            let key = (district.name.clone(), page);
            if self.poison.lock().unwrap().remove(&key) {
                return Err(anyhow!("injected fetch failure"));
            }
            self.fetched.lock().unwrap().push(key);
            Ok(results_html(&district.name, page, self.total_pages))
        }

        async fn detail_page(&self, _href: &str) -> Result<String> {
            Ok(DETAIL_HTML.to_string())
        }

        async fn certificate(&self, _qstr: &str) -> Result<String> {
            Err(anyhow!("no certificate service in tests"))
        }
    }

    struct FailingRegistry;

    #[async_trait]
    impl RegistrySource for FailingRegistry {
        async fn districts(&self) -> Result<Vec<District>> {
            Err(anyhow!("registry unreachable"))
        }
        async fn results_page(&self, _district: &District, _page: i32) -> Result<String> {
            Err(anyhow!("registry unreachable"))
        }
        async fn detail_page(&self, _href: &str) -> Result<String> {
            Err(anyhow!("registry unreachable"))
        }
        async fn certificate(&self, _qstr: &str) -> Result<String> {
            Err(anyhow!("registry unreachable"))
        }
    }

    fn crawler<S: RegistrySource>(
        source: S,
        dir: &std::path::Path,
        max_retries: u32,
    ) -> Crawler<S> {
        Crawler {
            source,
            state: StateFile::new(dir.join("state.json")),
            sink: CsvSink::new(dir.join("out.csv")),
            page_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            max_retries,
        }
    }

    fn data_rows(dir: &std::path::Path) -> Vec<String> {
        let contents = std::fs::read_to_string(dir.join("out.csv")).unwrap();
        contents.lines().skip(1).map(str::to_string).collect()
    }

    #[tokio::test]
    async fn resume_skips_committed_pages_and_earlier_districts() {
        let dir = tempfile::tempdir().unwrap();
        StateFile::new(dir.path().join("state.json"))
            .save("Pune", 1, 3)
            .unwrap();

        let mut crawler = crawler(
            MockRegistry::new(&["Thane", "Ahmednagar", "beed", "Pune"], 3),
            dir.path(),
            1,
        );
        let outcome = crawler.run().await.unwrap();
        assert_eq!(outcome, CrawlOutcome::Completed);

        // Ahmednagar and beed sort before Pune: skipped entirely. Pune
        // resumes at page 2; Thane runs all three pages.
        assert_eq!(
            crawler.source.fetched(),
            vec![
                ("Pune".to_string(), 2),
                ("Thane".to_string(), 0),
                ("Thane".to_string(), 1),
                ("Thane".to_string(), 2),
            ]
        );

        let final_state = crawler.state.load();
        assert_eq!(final_state.current_district, "Thane");
        assert_eq!(final_state.current_page, -1);
    }

    #[tokio::test]
    async fn crash_and_resume_emits_each_page_exactly_once() {
        let dir = tempfile::tempdir().unwrap();

        // First run dies fetching page 1 and gives up (retry budget 1);
        // page 0 is already committed to the sink and the checkpoint.
        let mut first = crawler(
            MockRegistry::new(&["Pune"], 2).poison_page("Pune", 1),
            dir.path(),
            1,
        );
        assert_eq!(first.run().await.unwrap(), CrawlOutcome::RetriesExhausted);
        assert_eq!(data_rows(dir.path()).len(), 1);

        // Second run resumes and completes.
        let mut second = crawler(MockRegistry::new(&["Pune"], 2), dir.path(), 1);
        assert_eq!(second.run().await.unwrap(), CrawlOutcome::Completed);
        assert_eq!(second.source.fetched(), vec![("Pune".to_string(), 1)]);

        let rows = data_rows(dir.path());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|r| r.contains("Pune-P0")).count(), 1);
        assert_eq!(rows.iter().filter(|r| r.contains("Pune-P1")).count(), 1);
    }

    #[tokio::test]
    async fn checkpoint_advances_after_every_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut crawler = crawler(
            MockRegistry::new(&["Pune"], 2).poison_page("Pune", 1),
            dir.path(),
            1,
        );
        crawler.run().await.unwrap();

        let checkpoint = crawler.state.load();
        assert_eq!(checkpoint.current_district, "Pune");
        assert_eq!(checkpoint.current_page, 0);
        assert_eq!(checkpoint.total_pages, 2);
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_is_a_terminal_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mut crawler = crawler(FailingRegistry, dir.path(), 3);
        assert_eq!(crawler.run().await.unwrap(), CrawlOutcome::RetriesExhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn no_politeness_pause_after_the_final_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut crawler = crawler(MockRegistry::new(&["Pune"], 3), dir.path(), 1);
        crawler.page_delay = Duration::from_millis(750);

        let t0 = tokio::time::Instant::now();
        assert_eq!(crawler.run().await.unwrap(), CrawlOutcome::Completed);
        // one pause between pages 1 and 2, none after the last page
        assert_eq!(t0.elapsed(), Duration::from_millis(750));
    }

    #[tokio::test]
    async fn certificate_failure_does_not_drop_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut crawler = crawler(MockRegistry::new(&["Pune"], 1), dir.path(), 1);
        assert_eq!(crawler.run().await.unwrap(), CrawlOutcome::Completed);

        let contents = std::fs::read_to_string(dir.path().join("out.csv")).unwrap();
        let rows = data_rows(dir.path());
        assert_eq!(rows.len(), 1);
        // the record keeps the certificate name; only the date is absent
        assert!(contents.contains("cert-0.pdf"));
        assert!(!contents.contains("Certificate Date"));
    }
}
