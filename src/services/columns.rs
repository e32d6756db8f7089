use std::collections::HashMap;

use strum::{Display, EnumIter, IntoEnumIterator};

/// Canonical fields a report column can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Field {
    Date,
    Time,
    Product,
    OrderId,
    ProductId,
    Platform,
    Revenue,
    Cost,
    Commission,
    Quantity,
    Status,
    Category,
    SubId1,
    Channel,
    Clicks,
    SubId,
}

/// Accepted normalized aliases per canonical field. Heavily weighted toward
/// Brazilian-Portuguese affiliate report exports (Shopee, Hotmart, ad
/// platforms), which are the primary source format.
fn aliases(field: Field) -> &'static [&'static str] {
    match field {
        Field::Date => &[
            "date", "data", "datapedido", "data_do_pedido", "datadopedido", "horario",
            "horario_do_pedido", "tempo", "tempo_de_conclusao", "tempo_conclusao",
            "tempo_dos_cliques",
        ],
        Field::Time => &["hora", "horario", "hora_do_pedido", "horario_do_pedido", "tempo_dos_cliques"],
        Field::Product => &["product", "produto", "produto_nome", "product_name", "nome_do_item"],
        Field::OrderId => &[
            "order_id", "idpedido", "id_do_pedido", "id_pagamento", "idpagamento",
            "numero_do_pedido",
        ],
        Field::ProductId => &["product_id", "id_do_item", "id_item", "item_id", "id_do_produto"],
        Field::Platform => &["platform", "plataforma", "canal", "channel", "origem", "origem_do_pedido"],
        Field::Revenue => &[
            "revenue", "receita", "valor", "valorvenda", "valor_receita", "valor_venda",
            "gross_value", "total", "valor_de_compra", "valor_de_compra_r", "valor_de_compra_rs",
            "valor_compra", "faturamento", "preco", "preco_r", "preco_rs",
        ],
        Field::Cost => &[
            "cost", "custo", "valorcusto", "custo_total", "valor_gasto",
            "valor_gasto_anuncios", "gasto_anuncios",
        ],
        Field::Commission => &[
            "commission", "comissao", "taxa", "fee", "commission_value", "taxa_de_cartao",
            "comissao_liquida", "comissao_liquida_do_afiliado", "comissao_liquida_do_afiliado_r",
            "comissao_liquida_do_afiliado_rs", "comissao_liquido_do_afiliado_r",
            "comissao_total_do_item_r", "comissao_total_do_pedido_r",
            "taxa_de_comissao_shopee_do_item", "taxa_de_comissao_do_vendedor_do_item",
            "comissao_do_item_da_shopee_r", "comissao_do_vendedor_r", "comissao_shopee_r",
            "comissao_shopee_rs",
        ],
        Field::Quantity => &["quantity", "quantidade", "qtd", "item_count", "count", "vendas", "sales_count"],
        Field::Status => &["status", "status_do_pedido", "status_pedido"],
        Field::Category => &["categoria", "categoria_global", "categoria_global_l1", "category"],
        Field::SubId1 => &["sub_id1", "subid1"],
        Field::Channel => &[
            "channel", "canal", "origem", "origem_do_pedido", "plataforma", "platform",
            "referenciador", "referrer",
        ],
        Field::Clicks => &[
            "clicks", "cliques", "total_de_cliques", "cliques_por_canal", "cliques_por_hora",
            "quantidade_cliques", "cliques_count",
        ],
        Field::SubId => &["sub_id", "subid", "subid1", "subid2", "id_sub", "referencia"],
    }
}

/// Normalized aliases tried first when several headers match the same field.
/// Disambiguates net-commission variants from generic fee/tax columns and
/// purchase-value variants from price columns.
const PRIORITY: &[&str] = &[
    "comissao_liquida_do_afiliado_r",
    "comissao_liquido_do_afiliado_r",
    "valor_de_compra_r",
    "valor_venda",
    "revenue",
    "commission",
];

/// Fold common Latin diacritics to their ASCII base letter. Headers in the
/// source exports are Portuguese; anything outside this range is kept as-is
/// and collapsed by `normalize_header`.
fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        _ => c,
    }
}

/// Normalize a raw header: lowercase, strip diacritics, collapse every run
/// of non-alphanumeric characters to a single underscore.
pub fn normalize_header(raw: &str) -> String {
    let lowered: String = raw.to_lowercase().chars().map(fold_diacritic).collect();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_sep = false;
    for c in lowered.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Resolution of raw CSV headers to canonical fields.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    indices: HashMap<Field, usize>,
    /// Non-fatal resolution warnings (missing columns degraded to defaults).
    pub warnings: Vec<String>,
}

impl ColumnMap {
    /// Resolve raw headers to canonical fields.
    ///
    /// For each field, priority aliases win over first-match-in-column-order.
    /// Missing columns are soft failures: the field is simply absent and the
    /// parser substitutes the documented default (quantity 1, monetary 0).
    pub fn resolve(headers: &[String]) -> Self {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
        let mut indices = HashMap::new();

        for field in Field::iter() {
            let alias_set = aliases(field);
            let found = PRIORITY
                .iter()
                .filter(|p| alias_set.contains(*p))
                .find_map(|p| normalized.iter().position(|n| n == *p))
                .or_else(|| normalized.iter().position(|n| alias_set.contains(&n.as_str())));
            if let Some(idx) = found {
                indices.insert(field, idx);
            }
        }

        let mut warnings = Vec::new();
        for (field, default) in [
            (Field::Revenue, "0"),
            (Field::Cost, "0"),
            (Field::Commission, "0"),
            (Field::Quantity, "1"),
        ] {
            if !indices.contains_key(&field) {
                warnings.push(format!("column '{field}' not found; defaulting to {default}"));
            }
        }

        Self { indices, warnings }
    }

    /// Index of the raw column resolved for `field`, if any.
    pub fn index_of(&self, field: Field) -> Option<usize> {
        self.indices.get(&field).copied()
    }

    /// Raw cell for `field` within a parsed record, trimmed; `None` when the
    /// column is unresolved or the cell is blank.
    pub fn cell<'a>(&self, field: Field, record: &'a csv::StringRecord) -> Option<&'a str> {
        let idx = self.index_of(field)?;
        let cell = record.get(idx)?.trim();
        if cell.is_empty() {
            None
        } else {
            Some(cell)
        }
    }

    /// Indices claimed by any canonical field; the rest go to the raw bag.
    pub fn claimed_indices(&self) -> Vec<usize> {
        let mut v: Vec<usize> = self.indices.values().copied().collect();
        v.sort_unstable();
        v.dedup();
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(hs: &[&str]) -> Vec<String> {
        hs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalizes_accents_and_punctuation() {
        assert_eq!(normalize_header("Comissão Líquida do Afiliado(R$)"), "comissao_liquida_do_afiliado_r");
        assert_eq!(normalize_header("  Data do Pedido "), "data_do_pedido");
        assert_eq!(normalize_header("Preço (R$)"), "preco_r");
        assert_eq!(normalize_header("clicks"), "clicks");
    }

    #[test]
    fn resolves_portuguese_headers() {
        let map = ColumnMap::resolve(&headers(&["Data", "Canal", "Cliques"]));
        assert_eq!(map.index_of(Field::Date), Some(0));
        assert_eq!(map.index_of(Field::Channel), Some(1));
        assert_eq!(map.index_of(Field::Clicks), Some(2));
    }

    #[test]
    fn priority_breaks_ties_toward_net_commission() {
        // Both "Taxa" and the net commission column match the commission
        // alias set; the curated priority list must pick the latter even
        // though it appears later in column order.
        let map = ColumnMap::resolve(&headers(&[
            "Taxa",
            "Comissão Líquida do Afiliado(R$)",
            "Data",
        ]));
        assert_eq!(map.index_of(Field::Commission), Some(1));
    }

    #[test]
    fn falls_back_to_first_match_in_column_order() {
        let map = ColumnMap::resolve(&headers(&["Fee", "Taxa"]));
        assert_eq!(map.index_of(Field::Commission), Some(0));
    }

    #[test]
    fn missing_measures_produce_warnings_not_failures() {
        let map = ColumnMap::resolve(&headers(&["Data", "Produto"]));
        assert_eq!(map.index_of(Field::Revenue), None);
        assert!(map.warnings.iter().any(|w| w.contains("revenue")));
        assert!(map.warnings.iter().any(|w| w.contains("quantity")));
    }

    #[test]
    fn claimed_indices_are_deduplicated() {
        // "Canal" resolves for both platform and channel.
        let map = ColumnMap::resolve(&headers(&["Data", "Canal"]));
        assert_eq!(map.claimed_indices(), vec![0, 1]);
    }
}
