use anyhow::Result;
use sales_diagnostics::*;

/// Reads an inline CSV export the way an upload handler would: every cell as
/// text, blanks as empty.
fn load_csv(data: &str, delimiter: u8) -> Result<RawDataset> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: RawRecord = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| {
                let value = if cell.is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::from(cell)
                };
                (header.clone(), value)
            })
            .collect();
        rows.push(row);
    }

    Ok(RawDataset::new(headers, rows))
}

const MESSY_EXPORT: &str = "\
Data Venda,Produto,Categoria,Vendedor,Qtd,Valor Total (R$),Estoque
2024-03-04,Arroz 5kg,Mercearia,Ana,2,500.00,10
2024-03-05,Detergente,Limpeza,Bia,3,300.00,40
2024-03-06,Suco,Bebidas,Ana,1,200.00,0
2024-03-06,Suco,Bebidas,Ana,1,200.00,0
2024-03-07,Arroz 5kg,Mercearia,Bia,1,-50.00,10
";

const CLEAN_EXPORT: &str = "\
Data;Produto;Categoria;Valor
03/06/2024;Cafe;Mercearia;R$ 1.234,56
04/06/2024;Acucar;Mercearia;R$ 65,44
10/06/2024;Cafe;Mercearia;R$ 800,00
11/06/2024;Sabonete;Higiene;R$ 200,00
";

fn all_time() -> AnalysisConfig {
    AnalysisConfig {
        period: PeriodFilter::All,
        ..Default::default()
    }
}

#[test]
fn test_messy_export_is_corrected() -> Result<()> {
    let dataset = load_csv(MESSY_EXPORT, b',')?;
    let output = SalesDiagnostics::run(&dataset, &all_time())?;

    assert_eq!(output.field_map.get(CanonicalField::Date), Some("Data Venda"));
    assert_eq!(output.field_map.get(CanonicalField::Value), Some("Valor Total (R$)"));
    assert_eq!(output.field_map.get(CanonicalField::Quantity), Some("Qtd"));
    assert_eq!(output.field_map.get(CanonicalField::Stock), Some("Estoque"));

    assert_eq!(output.raw_stats.total_rows, 5);
    assert_eq!(output.raw_stats.duplicates, 1);
    assert_eq!(output.raw_stats.negatives_corrected, 1);
    assert_eq!(output.raw_stats.valid_rows, 4);

    // Clamping and duplicate collapse are data hygiene, not drift: both
    // pipelines agree and the run is approved with warnings.
    assert_eq!(output.produced.kpis.revenue, 1000.0);
    assert_eq!(output.produced.kpis.sales_count, 4);
    assert_eq!(output.produced, output.corrected);

    let report = &output.report;
    assert!(report.approved, "{}", report.to_markdown());
    assert!(report.critical_errors.is_empty());
    assert!(report.grave_errors.is_empty(), "{}", report.to_markdown());
    assert!(report
        .warnings
        .iter()
        .any(|f| f.check == "raw_data" && f.message.contains("negative")));
    assert!(report
        .warnings
        .iter()
        .any(|f| f.check == "raw_data" && f.message.contains("duplicate")));
    assert!(!report.corrections.iter().any(|c| c.target == "revenue"));

    let kpis = &output.corrected.kpis;
    assert_eq!(kpis.revenue, 1000.0);
    assert_eq!(kpis.sales_count, 4);
    assert_eq!(kpis.quantity_total, 7.0);
    assert!((kpis.ticket_average - 250.0).abs() < 1e-9);
    assert_eq!(kpis.top_products[0].dimension_value, "Arroz 5kg");
    assert_eq!(kpis.top_products[0].value_sum, 500.0);

    let abc = &output.corrected.category_abc;
    let names: Vec<&str> = abc.items.iter().map(|i| i.name.as_str()).collect();
    let classes: Vec<AbcClass> = abc.items.iter().map(|i| i.class).collect();
    assert_eq!(names, vec!["Mercearia", "Limpeza", "Bebidas"]);
    assert_eq!(classes, vec![AbcClass::A, AbcClass::C, AbcClass::D]);

    let closure: f64 = output
        .corrected
        .weekday
        .buckets
        .iter()
        .map(|b| b.percentage)
        .sum();
    assert!((closure - 100.0).abs() < 0.1);

    let stock = output.corrected.stock.as_ref().expect("stock column resolved");
    let suco = stock.products.iter().find(|p| p.product == "Suco").unwrap();
    assert_eq!(suco.units_sold, 1.0);
    assert_eq!(suco.condition, StockCondition::Stockout);

    Ok(())
}

#[test]
fn test_negative_and_fractional_rows_are_approved() -> Result<()> {
    let dataset = load_csv(
        "\
Data,Produto,Qtd,Valor
2024-03-04,Arroz,1.5,500.004
2024-03-05,Feijao,0.75,-50
2024-03-05,Sal,0.4,20
",
        b',',
    )?;
    let output = SalesDiagnostics::run(&dataset, &all_time())?;

    assert!(output.is_approved(), "{}", output.report.to_markdown());
    assert!(output.report.grave_errors.is_empty());
    assert_eq!(output.raw_stats.negatives_corrected, 1);

    let kpis = &output.corrected.kpis;
    assert_eq!(kpis.revenue, 520.0);
    // 1.5 and 0.75 round up to whole units, 0.4 rounds down to none.
    assert_eq!(kpis.quantity_total, 3.0);
    assert_eq!(output.produced.kpis, output.corrected.kpis);
    Ok(())
}

#[test]
fn test_export_without_dates_is_analyzed() -> Result<()> {
    let dataset = load_csv(
        "\
Valor,Produto,Categoria
500,Arroz,Mercearia
300,Sabao,Limpeza
",
        b',',
    )?;
    let output = SalesDiagnostics::run(&dataset, &AnalysisConfig::default())?;

    assert!(output.field_map.get(CanonicalField::Date).is_none());
    assert!(output.is_approved(), "{}", output.report.to_markdown());
    assert!(output.report.critical_errors.is_empty());
    assert_eq!(output.corrected.kpis.revenue, 800.0);
    assert_eq!(output.corrected.kpis.sales_count, 2);
    assert!(output.corrected.comparisons.revenue.is_none());
    assert!(output.corrected.current_window.is_none());
    assert!(!output.corrected.category_abc.is_empty());
    Ok(())
}

#[test]
fn test_clean_brazilian_export_is_approved() -> Result<()> {
    let dataset = load_csv(CLEAN_EXPORT, b';')?;
    let config = AnalysisConfig {
        period: PeriodFilter::Last7Days,
        ..Default::default()
    };
    let output = SalesDiagnostics::run(&dataset, &config)?;

    assert!(output.is_approved(), "{}", output.report.to_markdown());
    assert!(output.report.corrections.is_empty());
    assert!(output.report.warnings.is_empty());
    assert_eq!(output.produced, output.corrected);

    let revenue = output.corrected.comparisons.revenue.unwrap();
    assert!((revenue.current_value - 1000.0).abs() < 1e-9);
    assert!((revenue.previous_value - 1300.0).abs() < 1e-9);
    assert_eq!(revenue.kind, ComparisonKind::Normal);
    assert!((revenue.delta_percent - (-23.076923)).abs() < 1e-4);

    let sales = output.corrected.comparisons.sales.unwrap();
    assert_eq!(sales.delta_percent, 0.0);

    assert_eq!(output.corrected.weekday.best_day.as_deref(), Some("Monday"));
    assert_eq!(output.corrected.weekday.worst_day.as_deref(), Some("Tuesday"));
    Ok(())
}

#[test]
fn test_invalid_thresholds_are_critical() -> Result<()> {
    let dataset = load_csv(MESSY_EXPORT, b',')?;
    let config = AnalysisConfig {
        category_thresholds: AbcThresholds::new(40.0, 30.0, 20.0, 5.0),
        ..all_time()
    };
    let output = SalesDiagnostics::run(&dataset, &config)?;

    assert!(!output.is_approved());
    assert!(output
        .report
        .critical_errors
        .iter()
        .any(|f| f.check == "abc_category"));
    assert!(output.corrected.category_abc.is_empty());
    assert!(!output.corrected.product_abc.is_empty());
    Ok(())
}

#[test]
fn test_category_filter_and_product_scope() -> Result<()> {
    let dataset = load_csv(MESSY_EXPORT, b',')?;
    let config = AnalysisConfig {
        product_category: Some("mercearia".to_string()),
        filters: RowFilters {
            seller: Some("Ana".to_string()),
            ..Default::default()
        },
        ..all_time()
    };
    let output = SalesDiagnostics::run(&dataset, &config)?;

    // Ana's rows: Arroz 500 and Suco 200 (duplicate collapsed).
    assert_eq!(output.corrected.kpis.revenue, 700.0);
    let products = &output.corrected.product_abc;
    assert_eq!(products.scope.as_deref(), Some("mercearia"));
    assert_eq!(products.items.len(), 1);
    assert_eq!(products.items[0].name, "Arroz 5kg");
    Ok(())
}

#[test]
fn test_aggregate_tolerance() {
    let rows = vec![
        SalesRow {
            value: 999.99,
            quantity: 1.0,
            ..Default::default()
        },
        SalesRow {
            value: 0.01,
            quantity: 1.0,
            ..Default::default()
        },
    ];

    let within = validate_aggregate("revenue", &rows, Metric::Value, AggregateKind::Sum, 999.98, 0.02);
    assert!(within.valid);

    let beyond = validate_aggregate("revenue", &rows, Metric::Value, AggregateKind::Sum, 1000.03, 0.02);
    assert!(!beyond.valid);
    let finding = beyond.finding.unwrap();
    assert_eq!(finding.severity, Severity::Grave);
    assert!(finding.message.contains("0.03"));
}

#[test]
fn test_comparison_new_and_zero() {
    let new = validate_comparison("revenue", 150.0, 0.0, None, 0.02);
    assert!(new.valid);
    assert_eq!(new.kind, ComparisonKind::New);
    assert_eq!(new.delta_percent, f64::INFINITY);

    let zero = validate_comparison("revenue", 0.0, 0.0, None, 0.02);
    assert!(zero.valid);
    assert_eq!(zero.kind, ComparisonKind::Zero);
    assert_eq!(zero.delta_percent, 0.0);

    let serialized = serde_json::to_string(&new.result(150.0, 0.0)).unwrap();
    assert!(serialized.contains("\"novo\""));
}

#[test]
fn test_percentage_closure_and_abc_monotonicity() -> Result<()> {
    let dataset = load_csv(MESSY_EXPORT, b',')?;
    let fields = CanonicalFieldMap::resolve(&dataset.headers);
    let rows = validate_raw_data(&dataset, &fields).corrected_rows;

    for dimension in [Dimension::Product, Dimension::Category, Dimension::Seller] {
        let buckets = aggregate(&rows, dimension);
        let closure: f64 = buckets.iter().map(|b| b.percentage).sum();
        assert!((closure - 100.0).abs() < 0.1, "{:?} closes at {}", dimension, closure);
    }

    let products = classify_products(&rows, None, &AbcThresholds::product_default())?;
    let accumulated: Vec<f64> = products
        .items
        .iter()
        .map(|i| i.accumulated_percentage)
        .collect();
    assert!(accumulated.windows(2).all(|w| w[0] <= w[1]));
    assert!((accumulated.last().copied().unwrap_or(0.0) - 100.0).abs() < 0.5);
    Ok(())
}

#[test]
fn test_config_from_json_and_schema() -> Result<()> {
    let config = AnalysisConfig::from_json(
        r#"{ "period": { "kind": "custom", "days": 45 }, "top_n": 3 }"#,
    )?;
    assert_eq!(config.period, PeriodFilter::Custom { days: 45 });
    assert_eq!(config.top_n, 3);
    assert_eq!(config.tolerance, 0.02);
    assert_eq!(config.category_thresholds, AbcThresholds::category_default());

    let schema = AnalysisConfig::schema_as_json()?;
    assert!(schema.contains("product_thresholds"));
    Ok(())
}
