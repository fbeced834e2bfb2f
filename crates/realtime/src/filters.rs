use serde::Serialize;

/// Row filter for a postgres_changes subscription
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DatabaseFilter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: serde_json::Value,
}

impl DatabaseFilter {
    /// Wire form understood by the realtime server, e.g. `booking_id=eq.42`
    pub fn to_filter_string(&self) -> String {
        let value = match &self.value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                format!("({})", parts.join(","))
            }
            other => other.to_string(),
        };
        format!("{}={}.{}", self.column, self.operator, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl std::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Neq => "neq",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::In => "in",
        };
        write!(f, "{}", s)
    }
}
