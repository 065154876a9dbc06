use crate::{
    error::FilterError,
    filter::SearchFilter,
    model::Field,
};

impl SearchFilter {
    /// Check every field reference against `fields`.
    ///
    /// Fails on unknown fields, unreadable fields, or an operator outside the
    /// field's permitted set. Free-text queries are always valid.
    pub fn validate_for_fields(&self, fields: &[Field]) -> Result<(), FilterError> {
        match self {
            Self::IncludeAll | Self::ExcludeAll | Self::Query(_) => Ok(()),
            Self::Field(filter) => {
                let field = fields
                    .iter()
                    .find(|field| field.name() == filter.name)
                    .ok_or_else(|| FilterError::UnknownField {
                        field: filter.name.clone(),
                    })?;
                if !field.readable {
                    return Err(FilterError::UnreadableField {
                        field: filter.name.clone(),
                    });
                }
                if !field.permits(filter.op) {
                    return Err(FilterError::OperatorNotPermitted {
                        field: filter.name.clone(),
                        op: filter.op.to_string(),
                    });
                }

                Ok(())
            }
            Self::And(and) => and
                .filters()
                .iter()
                .try_for_each(|f| f.validate_for_fields(fields)),
            Self::Or(or) => or
                .filters()
                .iter()
                .try_for_each(|f| f.validate_for_fields(fields)),
            Self::Not(not) => not.inner().validate_for_fields(fields),
        }
    }

    /// Names of every field this filter references, in first-seen order.
    #[must_use]
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::IncludeAll | Self::ExcludeAll | Self::Query(_) => {}
            Self::Field(filter) => {
                if !out.contains(&filter.name.as_str()) {
                    out.push(&filter.name);
                }
            }
            Self::And(and) => and.filters().iter().for_each(|f| f.collect_fields(out)),
            Self::Or(or) => or.filters().iter().for_each(|f| f.collect_fields(out)),
            Self::Not(not) => not.inner().collect_fields(out),
        }
    }
}
