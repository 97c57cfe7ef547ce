pub fn render_schema(vector_dim: u32) -> String {
	let init = include_str!("../../../sql/init.sql");
	let expanded = expand_includes(init);

	expanded.replace("<VECTOR_DIM>", &vector_dim.to_string())
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_nodes.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_nodes.sql")),
				"tables/002_frontier.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_frontier.sql")),
				"tables/003_usage_counters.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_usage_counters.sql")),
				"tables/004_scheduler_settings.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_scheduler_settings.sql")),
				"tables/005_blobs.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_blobs.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
