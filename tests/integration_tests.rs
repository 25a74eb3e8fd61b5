use chrono::NaiveDate;
use ledger_insights::anomaly::deduplicate;
use ledger_insights::normalizer::UNMAPPED_BUCKET;
use ledger_insights::statements::{TAG_CASH, TAG_TRADE_PAYABLES};
use ledger_insights::*;
use pretty_assertions::assert_eq;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn retail_mapping() -> Vec<MappingEntry> {
    vec![
        MappingEntry::new("400000", "Product sales", AccountType::Revenue),
        MappingEntry::new("600000", "Rent", AccountType::Opex),
        MappingEntry::new("620000", "Salaries", AccountType::Payroll),
        MappingEntry::new("140000", "Trade debtors", AccountType::Receivable),
        MappingEntry::new("160000", "Trade creditors", AccountType::Payable),
    ]
}

/// A year of sales, rent and payroll with a few open receivables and payables.
fn retail_feed() -> Vec<RawTransaction> {
    let mut rows = Vec::new();
    for m in 1..=12u32 {
        let posted = date(2024, m, 12);
        rows.push(RawTransaction::new(
            posted,
            &format!("INV-{}", m),
            "400000",
            20_000.0 + 500.0 * m as f64,
        ));
        rows.push(RawTransaction::new(posted, &format!("RENT-{}", m), "600000", 3_000.0));
        rows.push(RawTransaction::new(
            date(2024, m, 28),
            &format!("PAY-{}", m),
            "620000",
            8_000.0 + if m % 2 == 0 { 150.0 } else { -150.0 },
        ));
    }

    for (i, (posted, due, open)) in [
        (date(2024, 9, 1), date(2024, 10, 1), 4_000.0),
        (date(2024, 11, 15), date(2024, 12, 15), 2_500.0),
        (date(2024, 12, 20), date(2025, 1, 19), 6_000.0),
    ]
    .into_iter()
    .enumerate()
    {
        let mut row = RawTransaction::new(posted, &format!("AR-{}", i), "140000", open);
        row.due_date = Some(due);
        row.open_amount = Some(open);
        row.customer_vendor = Some(format!("Customer {}", i));
        rows.push(row);
    }

    let mut bill = RawTransaction::new(date(2024, 10, 5), "AP-0", "160000", -1_800.0);
    bill.due_date = Some(date(2024, 11, 4));
    bill.open_amount = Some(-1_800.0);
    bill.customer_vendor = Some("Supplier A".to_string());
    rows.push(bill);

    rows
}

#[test]
fn test_mapping_join_with_unmapped_accounts() {
    let mapping = vec![MappingEntry::new("400000", "Product sales", AccountType::Revenue)];
    let feed: Vec<RawTransaction> = (0..100u32)
        .map(|i| {
            let posted = date(2024, i % 4 + 1, i % 28 + 1);
            let gl = if i < 60 { "400000" } else { "999999" };
            RawTransaction::new(posted, &format!("DOC-{}", i), gl, 1_000.0)
        })
        .collect();

    let report = run_review(&feed, mapping, &AnalysisConfig::default()).unwrap();

    // one of two accounts unmapped: a warning, not an error
    assert!(report.quality.is_valid);
    assert!(!report.quality.warnings.is_empty());

    let normalization = &report.normalization;
    assert_eq!(normalization.transactions.len(), 100);
    assert_eq!(normalization.mapped_count, 60);
    assert_eq!(normalization.unmapped_count, 40);

    for txn in &normalization.transactions {
        assert_eq!(txn.is_mapped, txn.gl_account == "400000");
        if !txn.is_mapped {
            assert_eq!(txn.bucket, UNMAPPED_BUCKET);
            assert_eq!(txn.account_type, AccountType::Other);
        }
    }

    assert!((report.kpis.summary.total_revenue - 60_000.0).abs() < 1e-6);
    assert!((report.kpis.summary.unmapped_pct - 40.0).abs() < 1e-9);

    assert_eq!(report.unmapped_accounts.len(), 1);
    assert_eq!(report.unmapped_accounts[0].gl_account, "999999");
    assert_eq!(report.unmapped_accounts[0].transaction_count, 40);
}

#[test]
fn test_full_review_of_retail_ledger() -> anyhow::Result<()> {
    let report = run_review(&retail_feed(), retail_mapping(), &AnalysisConfig::default())?;

    assert!(report.quality.is_valid);
    assert_eq!(report.normalization.as_of_date, date(2024, 12, 28));
    assert_eq!(report.kpis.monthly.len(), 12);
    assert!(report.kpis.dso.is_some());

    let forecast = report.forecast.as_ref().expect("forecast enabled by default");
    assert!(forecast
        .forecasts
        .iter()
        .any(|p| p.account_type == AccountType::Revenue));
    for point in &forecast.forecasts {
        assert!(point.lower_bound <= point.forecast && point.forecast <= point.upper_bound);
    }

    assert_eq!(report.ratios.len(), ratios::RATIO_DEFINITIONS.len());
    let json = report.to_json()?;
    assert!(json.contains("\"ar_aging\""));
    assert!(json.contains("\"rolling_averages\""));
    Ok(())
}

#[test]
fn test_review_is_idempotent() -> anyhow::Result<()> {
    let config = AnalysisConfig::default();
    let first = run_review(&retail_feed(), retail_mapping(), &config)?;
    let second = run_review(&retail_feed(), retail_mapping(), &config)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_spike_is_flagged_once_with_worst_severity() {
    let baseline = [
        1000.0, 1010.0, 990.0, 1005.0, 995.0, 1000.0, 1002.0, 998.0, 1008.0, 992.0, 1000.0, 1000.0,
    ];
    let mapping = MappingTable::from_entries(vec![MappingEntry::new(
        "600000",
        "Rent",
        AccountType::Opex,
    )]);
    let rows: Vec<RawTransaction> = baseline
        .iter()
        .enumerate()
        .map(|(i, amount)| {
            let amount = if i == 6 { 5000.0 } else { *amount };
            let mut row =
                RawTransaction::new(date(2023, i as u32 + 1, 15), &format!("R{}", i), "600000", amount);
            row.customer_vendor = Some("Landlord GmbH".to_string());
            row
        })
        .collect();

    let config = AnalysisConfig::default();
    let txns = normalize(&rows, &mapping, &config).unwrap().transactions;
    let detector = AnomalyDetector::new(&txns, &config);
    let spike = YearMonth::new(2023, 7);

    // twelve points cap |z| near 3.18, so z-score alone only reaches the low band
    let by_zscore = detector.detect_with(DetectionMethod::ZScore);
    assert_eq!(by_zscore.len(), 1);
    assert_eq!(by_zscore[0].period, spike);
    assert_eq!(by_zscore[0].severity, Severity::Low);

    let by_mad = detector.detect_with(DetectionMethod::Mad);
    assert_eq!(by_mad.len(), 1);
    assert_eq!(by_mad[0].severity, Severity::High);

    let merged = deduplicate(by_zscore.into_iter().chain(by_mad).collect());
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].method, DetectionMethod::Mad);

    let result = detector.detect_all();
    let at_spike: Vec<&Anomaly> = result
        .anomalies
        .iter()
        .filter(|a| a.period == spike)
        .collect();
    assert_eq!(at_spike.len(), 1);
    assert_eq!(at_spike[0].severity, Severity::High);
    assert!(at_spike[0].explanation.contains("Landlord GmbH"));
    assert_eq!(result.summary.skipped_series, 0);
}

#[test]
fn test_aging_partitions_every_open_item() {
    let mapping = MappingTable::from_entries(vec![MappingEntry::new(
        "140000",
        "Trade debtors",
        AccountType::Receivable,
    )]);
    let as_of = date(2024, 6, 30);
    // days overdue: 0, 10, 45, 75, 200 and one not yet due
    let offsets = [0i64, 10, 45, 75, 200, -5];
    let rows: Vec<RawTransaction> = offsets
        .iter()
        .enumerate()
        .map(|(i, days)| {
            let mut row = RawTransaction::new(date(2024, 1, 10), &format!("AR-{}", i), "140000", 100.0);
            row.due_date = Some(as_of - chrono::Duration::days(*days));
            row.open_amount = Some(100.0);
            row
        })
        .collect();

    let config = AnalysisConfig {
        as_of_date: Some(as_of),
        ..Default::default()
    };
    let txns = normalize(&rows, &mapping, &config).unwrap().transactions;
    let aging = calculate_aging(&txns, &config);

    let labels: Vec<&str> = aging.ar_aging.iter().map(|b| b.aging_bucket.as_str()).collect();
    assert_eq!(
        labels,
        vec!["Current", "0-30 days", "31-60 days", "61-90 days", ">90 days", "Unknown"]
    );
    for bucket in &aging.ar_aging {
        assert_eq!(bucket.item_count, 1, "bucket {}", bucket.aging_bucket);
    }
    let total: usize = aging.ar_aging.iter().map(|b| b.item_count).sum();
    assert_eq!(total, offsets.len());
    assert!((aging.ar_summary.total_outstanding - 600.0).abs() < 1e-9);
    assert!(aging.ap_aging.is_empty());
}

#[test]
fn test_current_ratio_from_tagged_accounts() {
    let mapping = MappingTable::from_entries(vec![
        MappingEntry::new("100000", "Bank", AccountType::Other).with_statement_tag(TAG_CASH),
        MappingEntry::new("160000", "Trade creditors", AccountType::Payable)
            .with_statement_tag(TAG_TRADE_PAYABLES),
    ]);
    let rows = vec![
        RawTransaction::new(date(2024, 3, 31), "BANK-1", "100000", 250_000.0),
        RawTransaction::new(date(2024, 3, 31), "BILL-1", "160000", -100_000.0),
    ];
    let config = AnalysisConfig::default();
    let txns = normalize(&rows, &mapping, &config).unwrap().transactions;
    let analysis = analyze_ratios(&txns, &config);

    let current = analysis
        .ratios
        .iter()
        .find(|r| r.name == "current_ratio")
        .unwrap();
    assert!(current.applicable);
    assert!((current.value - 2.5).abs() < 1e-9);
    assert_eq!(current.status, Some(RatioStatus::Excellent));

    // no revenue at all: margin ratios are not applicable, not errors
    let net_margin = analysis
        .ratios
        .iter()
        .find(|r| r.name == "net_profit_margin")
        .unwrap();
    assert!(!net_margin.applicable);
    assert_eq!(net_margin.status, None);

    let gc = &analysis.going_concern;
    let mean = (gc.liquidity_score + gc.solvency_score + gc.cash_flow_score) / 3.0;
    assert!((gc.overall_score - mean).abs() < 1e-9);
    assert_eq!(gc.overall_status, GoingConcernStatus::from_score(gc.overall_score));
}

#[test]
fn test_going_concern_tiers() {
    assert_eq!(GoingConcernStatus::from_score(80.0), GoingConcernStatus::Strong);
    assert_eq!(GoingConcernStatus::from_score(79.9), GoingConcernStatus::Adequate);
    assert_eq!(GoingConcernStatus::from_score(60.0), GoingConcernStatus::Adequate);
    assert_eq!(GoingConcernStatus::from_score(40.0), GoingConcernStatus::Concerning);
    assert_eq!(GoingConcernStatus::from_score(39.9), GoingConcernStatus::Critical);
}

#[test]
fn test_config_json_round_trip_and_schema() -> anyhow::Result<()> {
    let mut config = AnalysisConfig::default();
    config.run_label = "fy2024".to_string();
    config.sign_convention = SignConvention::PositiveCredit;
    config.forecast.periods = 3;

    let json = config.to_json()?;
    let restored = AnalysisConfig::from_json_str(&json)?;
    assert_eq!(restored, config);

    // partial documents fill in defaults
    let partial = AnalysisConfig::from_json_str(r#"{ "run_label": "q1" }"#)?;
    assert_eq!(partial.aging.buckets, default_aging_buckets());

    let overlapping = r#"{ "aging": { "buckets": [
        { "min_days": 0, "max_days": 30, "label": "a" },
        { "min_days": 20, "max_days": 60, "label": "b" }
    ] } }"#;
    assert!(matches!(
        AnalysisConfig::from_json_str(overlapping),
        Err(LedgerError::InvalidAgingBucket { .. })
    ));

    let schema = serde_json::to_string_pretty(&AnalysisConfig::json_schema())?;
    assert!(schema.contains("sign_convention"));
    assert!(schema.contains("isolation_contamination"));
    Ok(())
}

#[test]
fn test_csv_ingestion_feeds_the_pipeline() -> anyhow::Result<()> {
    let mapping_csv = "\
gl_account,bucket,type,statement_tag
400000,Product sales,Revenue,
600000,Rent,OPEX,
140000,Trade debtors,Receivable,
";
    let ledger_csv = "\
Buchungsdatum,Beleg,Konto,Betrag,customer_vendor,due_date,open_amount
15.01.2024,D1,400000,\"1000,50\",,,
15.02.2024,D2,400000,1100.00,,,
15.03.2024,D3,400000,1200.00,,,
20.01.2024,R1,600000,400.00,,,
20.02.2024,R2,600000,400.00,,,
20.03.2024,R3,600000,400.00,,,
01.03.2024,A1,140000,900.00,Acme AG,2024-03-15,900.00
";

    let mapping = load_mapping_csv(mapping_csv.as_bytes())?;
    assert_eq!(mapping.len(), 3);

    let columns = ColumnMapping::new()
        .rename("Buchungsdatum", "posting_date")
        .rename("Beleg", "doc_id")
        .rename("Konto", "gl_account")
        .rename("Betrag", "amount");
    let raw = load_transactions_csv(ledger_csv.as_bytes(), &columns)?;
    assert_eq!(raw.len(), 7);
    assert_eq!(raw[0].amount, Some(1000.5));
    assert_eq!(raw[0].posting_date, Some(date(2024, 1, 15)));

    let report = ReviewPipeline::new(&AnalysisConfig::default()).run(&raw, &mapping)?;
    assert_eq!(report.normalization.unmapped_count, 0);
    assert!((report.kpis.summary.total_revenue - 3300.5).abs() < 1e-9);

    let ar_total: usize = report.aging.ar_aging.iter().map(|b| b.item_count).sum();
    assert_eq!(ar_total, 1);
    Ok(())
}

#[test]
fn test_missing_ledger_column_is_fatal() {
    let ledger_csv = "posting_date,doc_id,amount\n2024-01-01,D1,10\n";
    let err = load_transactions_csv(ledger_csv.as_bytes(), &ColumnMapping::new()).unwrap_err();
    assert!(matches!(err, LedgerError::MissingColumns { .. }));
}
