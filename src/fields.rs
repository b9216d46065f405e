use crate::utils::{compact_text, fold_text};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Date,
    Value,
    Product,
    Category,
    Supplier,
    Seller,
    Quantity,
    Stock,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 8] = [
        CanonicalField::Date,
        CanonicalField::Value,
        CanonicalField::Product,
        CanonicalField::Category,
        CanonicalField::Supplier,
        CanonicalField::Seller,
        CanonicalField::Quantity,
        CanonicalField::Stock,
    ];

    /// Resolution order. Narrow roles go first so that broad variants such as
    /// "total" cannot claim a "Qtd Total" or "Estoque Total" column.
    const RESOLUTION_ORDER: [CanonicalField; 8] = [
        CanonicalField::Date,
        CanonicalField::Quantity,
        CanonicalField::Stock,
        CanonicalField::Value,
        CanonicalField::Category,
        CanonicalField::Supplier,
        CanonicalField::Seller,
        CanonicalField::Product,
    ];

    pub fn variants(&self) -> &'static [&'static str] {
        match self {
            CanonicalField::Date => &[
                "data",
                "date",
                "data venda",
                "data_venda",
                "dt",
                "dia",
                "emissao",
                "data emissao",
                "periodo",
            ],
            CanonicalField::Value => &[
                "valor",
                "preco",
                "total",
                "vlr",
                "amount",
                "valor total",
                "valor_venda",
                "receita",
                "faturamento",
                "price",
                "revenue",
            ],
            CanonicalField::Product => &[
                "produto",
                "product",
                "item",
                "descricao",
                "nome produto",
                "mercadoria",
                "sku",
            ],
            CanonicalField::Category => &[
                "categoria",
                "category",
                "grupo",
                "departamento",
                "secao",
                "familia",
                "linha",
            ],
            CanonicalField::Supplier => &[
                "fornecedor",
                "supplier",
                "marca",
                "fabricante",
                "vendor",
                "brand",
            ],
            CanonicalField::Seller => &[
                "vendedor",
                "seller",
                "atendente",
                "operador",
                "salesperson",
                "representante",
            ],
            CanonicalField::Quantity => &[
                "quantidade",
                "qtd",
                "qtde",
                "quant",
                "quantity",
                "qty",
                "unidades",
                "units",
            ],
            CanonicalField::Stock => &[
                "estoque",
                "stock",
                "saldo",
                "inventory",
                "estoque atual",
            ],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CanonicalField::Date => "date",
            CanonicalField::Value => "value",
            CanonicalField::Product => "product",
            CanonicalField::Category => "category",
            CanonicalField::Supplier => "supplier",
            CanonicalField::Seller => "seller",
            CanonicalField::Quantity => "quantity",
            CanonicalField::Stock => "stock",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchStrategy {
    Exact,
    Substring,
    Compact,
}

const MATCH_STRATEGIES: [MatchStrategy; 3] = [
    MatchStrategy::Exact,
    MatchStrategy::Substring,
    MatchStrategy::Compact,
];

/// Shortest header allowed to match as a fragment of a longer variant.
const MIN_REVERSE_FRAGMENT: usize = 3;

fn matches(strategy: MatchStrategy, header: &str, variant: &str) -> bool {
    match strategy {
        MatchStrategy::Exact => fold_text(header) == fold_text(variant),
        MatchStrategy::Substring => {
            let header = fold_text(header);
            let variant = fold_text(variant);
            if header.is_empty() {
                return false;
            }
            header.contains(&variant)
                || (header.chars().count() >= MIN_REVERSE_FRAGMENT && variant.contains(&header))
        }
        MatchStrategy::Compact => {
            let header = compact_text(header);
            !header.is_empty() && header == compact_text(variant)
        }
    }
}

/// Semantic role → column name, resolved once per dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalFieldMap {
    fields: BTreeMap<CanonicalField, String>,
}

impl CanonicalFieldMap {
    pub fn resolve<S: AsRef<str>>(headers: &[S]) -> Self {
        let mut fields: BTreeMap<CanonicalField, String> = BTreeMap::new();

        for role in CanonicalField::RESOLUTION_ORDER {
            let found = MATCH_STRATEGIES.iter().find_map(|strategy| {
                headers
                    .iter()
                    .map(|h| h.as_ref())
                    .filter(|h| !fields.values().any(|claimed| claimed.as_str() == *h))
                    .find(|h| role.variants().iter().any(|v| matches(*strategy, h, v)))
            });

            match found {
                Some(header) => {
                    debug!("Resolved {} -> '{}'", role, header);
                    fields.insert(role, header.to_string());
                }
                None => debug!("No column resolved for {}", role),
            }
        }

        Self { fields }
    }

    /// Builds a map from explicit assignments, bypassing fuzzy matching.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (CanonicalField, S)>,
        S: Into<String>,
    {
        Self {
            fields: pairs.into_iter().map(|(f, s)| (f, s.into())).collect(),
        }
    }

    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).map(|s| s.as_str())
    }

    pub fn has(&self, field: CanonicalField) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn missing(&self) -> Vec<CanonicalField> {
        CanonicalField::ALL
            .iter()
            .copied()
            .filter(|f| !self.has(*f))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalField, &str)> {
        self.fields.iter().map(|(f, s)| (*f, s.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_portuguese_headers() {
        let headers = vec![
            "Data da Venda",
            "Produto",
            "Categoria",
            "Fornecedor",
            "Vendedor",
            "Qtd",
            "Valor Total",
            "Estoque",
        ];
        let map = CanonicalFieldMap::resolve(&headers);

        assert_eq!(map.get(CanonicalField::Date), Some("Data da Venda"));
        assert_eq!(map.get(CanonicalField::Product), Some("Produto"));
        assert_eq!(map.get(CanonicalField::Category), Some("Categoria"));
        assert_eq!(map.get(CanonicalField::Supplier), Some("Fornecedor"));
        assert_eq!(map.get(CanonicalField::Seller), Some("Vendedor"));
        assert_eq!(map.get(CanonicalField::Quantity), Some("Qtd"));
        assert_eq!(map.get(CanonicalField::Value), Some("Valor Total"));
        assert_eq!(map.get(CanonicalField::Stock), Some("Estoque"));
        assert!(map.missing().is_empty());
    }

    #[test]
    fn test_exact_match_beats_substring() {
        let headers = vec!["Valor Unitario", "Valor"];
        let map = CanonicalFieldMap::resolve(&headers);
        assert_eq!(map.get(CanonicalField::Value), Some("Valor"));
    }

    #[test]
    fn test_accent_and_separator_insensitive() {
        let headers = vec!["PREÇO", "data-venda"];
        let map = CanonicalFieldMap::resolve(&headers);
        assert_eq!(map.get(CanonicalField::Value), Some("PREÇO"));
        assert_eq!(map.get(CanonicalField::Date), Some("data-venda"));
    }

    #[test]
    fn test_separated_header_matches_variant() {
        let headers = vec!["ESTOQUE-ATUAL"];
        let map = CanonicalFieldMap::resolve(&headers);
        assert_eq!(map.get(CanonicalField::Stock), Some("ESTOQUE-ATUAL"));
    }

    #[test]
    fn test_header_is_not_claimed_twice() {
        let headers = vec!["Qtd Total", "Total"];
        let map = CanonicalFieldMap::resolve(&headers);
        assert_eq!(map.get(CanonicalField::Quantity), Some("Qtd Total"));
        assert_eq!(map.get(CanonicalField::Value), Some("Total"));
    }

    #[test]
    fn test_unmatched_roles_stay_absent() {
        let headers = vec!["Valor", "Cliente"];
        let map = CanonicalFieldMap::resolve(&headers);
        assert_eq!(map.len(), 1);
        assert!(!map.has(CanonicalField::Date));
        assert!(map.missing().contains(&CanonicalField::Product));
    }

    #[test]
    fn test_salesperson_is_not_taken_for_value() {
        let headers = vec!["Salesperson", "Valor da Venda"];
        let map = CanonicalFieldMap::resolve(&headers);
        assert_eq!(map.get(CanonicalField::Value), Some("Valor da Venda"));
        assert_eq!(map.get(CanonicalField::Seller), Some("Salesperson"));
    }

    #[test]
    fn test_explicit_pairs_bypass_matching() {
        let map = CanonicalFieldMap::from_pairs([
            (CanonicalField::Value, "coluna_x"),
            (CanonicalField::Date, "quando"),
        ]);
        assert_eq!(map.get(CanonicalField::Value), Some("coluna_x"));

        let pairs: Vec<(CanonicalField, &str)> = map.iter().collect();
        assert_eq!(
            pairs,
            vec![(CanonicalField::Date, "quando"), (CanonicalField::Value, "coluna_x")]
        );
    }

    #[test]
    fn test_short_header_does_not_match_as_fragment() {
        let headers = vec!["a", "id"];
        let map = CanonicalFieldMap::resolve(&headers);
        assert!(map.is_empty());
    }
}
