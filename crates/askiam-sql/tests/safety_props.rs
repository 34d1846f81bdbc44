//! Property tests for generated-SQL safety

use askiam_sql::{
    GeneratedQuery, QueryIntent, SqlSafetyValidator, TableAllowlist, TemplateSqlGenerator,
    UnsafeQueryError,
};
use proptest::prelude::*;

fn value() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 '@.;_-]{0,30}"
}

fn intent() -> impl Strategy<Value = QueryIntent> {
    prop_oneof![
        value().prop_map(|identifier| QueryIntent::FindUser { identifier }),
        value().prop_map(|name| QueryIntent::FindApplication { name }),
        (value(), value())
            .prop_map(|(role, application)| QueryIntent::FindRoleInApplication { role, application }),
        value().prop_map(|role| QueryIntent::FindRole { role }),
    ]
}

fn foreign_table() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("mysql.user".to_string()),
        Just("pg_shadow".to_string()),
        Just("information_schema.tables".to_string()),
        Just("Secrets".to_string()),
        "[a-z]{3,12}_audit",
    ]
}

fn generated(intent: &QueryIntent) -> GeneratedQuery {
    TemplateSqlGenerator::default().render(intent).unwrap()
}

proptest! {
    #[test]
    fn template_output_is_always_accepted(intent in intent()) {
        let validator = SqlSafetyValidator::new(TableAllowlist::default());
        let query = generated(&intent);
        let safe = validator.approve(query.clone());
        prop_assert!(safe.is_ok(), "rejected {:?}: {:?}", query, safe);
    }

    #[test]
    fn stacked_drop_is_rejected(
        intent in intent(),
        table in "(Users|Roles|Applications)",
        terminate in any::<bool>(),
        behind_backslash in any::<bool>(),
    ) {
        let validator = SqlSafetyValidator::new(TableAllowlist::default());
        let base = generated(&intent).sql;
        let tail = if terminate { ";" } else { "" };
        if behind_backslash {
            // Standard SQL closes the literal at `'\'`; MySQL would not
            let sql = format!("{base} AND 1 = '\\'; DROP TABLE {table}{tail} --'");
            prop_assert!(matches!(validator.check(&sql), Err(UnsafeQueryError::Malformed(_))));
        } else {
            let sql = format!("{base}; DROP TABLE {table}{tail}");
            prop_assert_eq!(validator.check(&sql), Err(UnsafeQueryError::MultipleStatements));
        }
    }

    #[test]
    fn second_statement_of_any_kind_is_rejected(intent in intent(), second in "(SELECT \\* FROM Users|DELETE FROM Roles|UPDATE Users SET x = 1)") {
        let validator = SqlSafetyValidator::new(TableAllowlist::default());
        let sql = format!("{}; {second}", generated(&intent).sql);
        prop_assert!(validator.check(&sql).is_err());
    }

    #[test]
    fn foreign_tables_are_rejected(intent in intent(), table in foreign_table(), form in 0..5u8) {
        let validator = SqlSafetyValidator::new(TableAllowlist::default());
        let base = generated(&intent).sql;
        let sql = match form {
            0 => format!("SELECT * FROM Users JOIN {table} ON 1 = 1"),
            1 => format!("{base} UNION SELECT * FROM {table}"),
            2 => format!("{base} UNION TABLE {table}"),
            3 => format!("SELECT * FROM Users WHERE EXISTS (TABLE {table})"),
            _ => format!("SELECT * FROM (TABLE {table}) AS t"),
        };
        prop_assert!(matches!(
            validator.check(&sql),
            Err(UnsafeQueryError::TableNotAllowed(_))
        ));
    }

    #[test]
    fn comment_obfuscation_is_rejected(intent in intent(), marker in "(--|/\\*|#)") {
        let validator = SqlSafetyValidator::new(TableAllowlist::default());
        let sql = format!("{} {marker} DROP TABLE Users", generated(&intent).sql);
        prop_assert_eq!(validator.check(&sql), Err(UnsafeQueryError::Comment));
    }

    #[test]
    fn validation_is_idempotent(sql in ".{0,120}") {
        let validator = SqlSafetyValidator::new(TableAllowlist::default());
        prop_assert_eq!(validator.check(&sql), validator.check(&sql));
    }

    #[test]
    fn accepted_statements_only_touch_allowlisted_tables(sql in "SELECT [a-z*, ]{1,10} FROM [A-Za-z_.]{1,16}( WHERE [a-z_]{1,8} = \\?)?") {
        let allowlist = TableAllowlist::default();
        let validator = SqlSafetyValidator::new(allowlist.clone());
        if let Ok(shape) = validator.check(&sql) {
            prop_assert!(shape.tables.iter().all(|t| allowlist.contains(t)));
        }
    }
}
